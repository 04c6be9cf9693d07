use rusqlite::{Row, params};
use serde_json::json;
use tracing::{debug, warn};

use crate::branches::{self, ForkIds};
use crate::database::Database;
use crate::error::{Error, Result};
use crate::models::{
    Attachment, ContextRef, Conversation, ConversationOp, CreateConversationInput, Message,
    MessageVersionResult, PathSource, SwitchOutcome,
};
use crate::rows::{
    append_branch, collect_rows, ensure_project_exists, find_conversation, generate_id,
    insert_conversation, insert_conversation_op, insert_message, list_conversations,
    load_conversation, load_message, load_owned_message, messages_for_conversation, now_ms,
    parse_json_column, retag_messages, to_json, update_conversation_path,
};

pub struct Conversations<'db> {
    pub(crate) db: &'db mut Database,
}

impl Conversations<'_> {
    pub fn create_conversation(&mut self, input: CreateConversationInput) -> Result<Conversation> {
        let now = now_ms();
        let tx = self.db.conn.transaction()?;

        if let Some(project_id) = input.project_id.as_deref() {
            ensure_project_exists(&tx, project_id)?;
        }

        let conversation = Conversation {
            id: generate_id(&tx, "conv")?,
            project_id: input.project_id,
            title: input.title.and_then(normalize_title),
            path: Vec::new(),
            branches: Vec::new(),
            active_branch_id: None,
            tags: Vec::new(),
            pinned: false,
            created_at_ms: now,
            updated_at_ms: now,
        };
        insert_conversation(&tx, &conversation)?;

        insert_conversation_op(
            &tx,
            &conversation.id,
            "conversation.created",
            &json!({
                "conversation_id": conversation.id.clone(),
                "project_id": conversation.project_id.clone(),
                "title": conversation.title.clone(),
            }),
            now,
        )?;

        tx.commit()?;
        debug!(conversation_id = %conversation.id, "conversation created");
        Ok(conversation)
    }

    pub fn get_conversation(&self, conversation_id: &str) -> Result<Option<Conversation>> {
        find_conversation(&self.db.conn, conversation_id)
    }

    /// Pinned conversations first, then most recently updated.
    pub fn list_conversations(
        &self,
        project_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Conversation>> {
        list_conversations(&self.db.conn, project_id, limit)
    }

    /// The active path resolved to message bodies, in path order.
    pub fn conversation_messages(&self, conversation_id: &str) -> Result<Vec<Message>> {
        let conversation = load_conversation(&self.db.conn, conversation_id)?;
        conversation
            .path
            .iter()
            .map(|message_id| load_message(&self.db.conn, message_id))
            .collect()
    }

    pub fn set_title(&mut self, conversation_id: &str, title: Option<&str>) -> Result<Conversation> {
        let title = title.map(str::to_string).and_then(normalize_title);
        self.update_metadata(conversation_id, json!({ "title": title.clone() }), |tx, now| {
            tx.execute(
                "UPDATE conversations SET title = ?2, updated_at_ms = ?3 WHERE id = ?1",
                params![conversation_id, title, now],
            )?;
            Ok(())
        })
    }

    pub fn set_pinned(&mut self, conversation_id: &str, pinned: bool) -> Result<Conversation> {
        self.update_metadata(conversation_id, json!({ "pinned": pinned }), |tx, now| {
            tx.execute(
                "UPDATE conversations SET pinned = ?2, updated_at_ms = ?3 WHERE id = ?1",
                params![conversation_id, pinned, now],
            )?;
            Ok(())
        })
    }

    pub fn set_tags<I, S>(&mut self, conversation_id: &str, tags: I) -> Result<Conversation>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let tags = normalize_tags(tags);
        let tags_json = to_json(&tags)?;
        self.update_metadata(conversation_id, json!({ "tags": tags }), |tx, now| {
            tx.execute(
                "UPDATE conversations SET tags_json = ?2, updated_at_ms = ?3 WHERE id = ?1",
                params![conversation_id, tags_json, now],
            )?;
            Ok(())
        })
    }

    pub fn set_project(
        &mut self,
        conversation_id: &str,
        project_id: Option<&str>,
    ) -> Result<Conversation> {
        self.update_metadata(conversation_id, json!({ "project_id": project_id }), |tx, now| {
            if let Some(project_id) = project_id {
                ensure_project_exists(tx, project_id)?;
            }
            tx.execute(
                "UPDATE conversations SET project_id = ?2, updated_at_ms = ?3 WHERE id = ?1",
                params![conversation_id, project_id, now],
            )?;
            Ok(())
        })
    }

    /// Remove the conversation together with every message and branch it owns.
    pub fn delete_conversation(&mut self, conversation_id: &str) -> Result<()> {
        let tx = self.db.conn.transaction()?;
        let deleted = tx.execute(
            "DELETE FROM conversations WHERE id = ?1",
            params![conversation_id],
        )?;
        if deleted == 0 {
            return Err(Error::ConversationNotFound(conversation_id.to_string()));
        }
        tx.commit()?;
        debug!(conversation_id, "conversation deleted");
        Ok(())
    }

    /// Edit a past message by forking the timeline.
    ///
    /// The new version takes the edited message's place and everything after
    /// it leaves the active path. The pre-edit path and the new path are both
    /// recorded as branches. `None` for attachments or references carries the
    /// edited message's values over.
    pub fn create_message_version(
        &mut self,
        conversation_id: &str,
        message_id: &str,
        new_content: &str,
        attachments: Option<Vec<Attachment>>,
        references: Option<Vec<ContextRef>>,
    ) -> Result<MessageVersionResult> {
        let now = now_ms();
        let tx = self.db.conn.transaction()?;

        let conversation = load_conversation(&tx, conversation_id)?;
        let edited = load_owned_message(&tx, conversation_id, message_id)?;
        if conversation.position_in_path(message_id).is_none() {
            return Err(Error::MessageNotInPath {
                conversation_id: conversation_id.to_string(),
                message_id: message_id.to_string(),
            });
        }

        let root_id = edited.version_root_id().to_string();
        let latest_version: i64 = tx.query_row(
            "SELECT COALESCE(MAX(version_number), 0)
             FROM messages
             WHERE id = ?1 OR version_of = ?1",
            params![root_id],
            |row| row.get(0),
        )?;
        let version_number = latest_version.max(edited.version_number) + 1;

        let new_message_id = generate_id(&tx, "msg")?;
        let old_branch_id = generate_id(&tx, "br")?;
        let new_branch_id = generate_id(&tx, "br")?;

        let plan = branches::plan_fork(
            &conversation,
            &edited,
            version_number,
            ForkIds {
                new_message_id: &new_message_id,
                old_branch_id: &old_branch_id,
                new_branch_id: &new_branch_id,
                now_ms: now,
            },
        )?;

        let new_message = Message {
            id: new_message_id,
            conversation_id: conversation_id.to_string(),
            role: edited.role,
            content: new_content.to_string(),
            attachments: attachments.unwrap_or_else(|| edited.attachments.clone()),
            references: references.unwrap_or_else(|| edited.references.clone()),
            parent_message_id: Some(edited.id.clone()),
            version_of: Some(root_id.clone()),
            version_number,
            branch_id: Some(new_branch_id.clone()),
            created_at_ms: now,
        };

        retag_messages(&tx, &conversation.path, &old_branch_id)?;
        insert_message(&tx, &new_message)?;
        append_branch(&tx, conversation_id, &plan.old_branch)?;
        append_branch(&tx, conversation_id, &plan.new_branch)?;
        update_conversation_path(
            &tx,
            conversation_id,
            &plan.new_path,
            Some(new_branch_id.as_str()),
            now,
        )?;

        insert_conversation_op(
            &tx,
            conversation_id,
            "message.versioned",
            &json!({
                "edited_message_id": edited.id.clone(),
                "new_message_id": new_message.id.clone(),
                "version_of": root_id,
                "version_number": version_number,
                "old_branch_id": old_branch_id,
                "new_branch_id": new_branch_id,
            }),
            now,
        )?;

        tx.commit()?;
        debug!(
            conversation_id,
            message_id,
            new_message_id = %new_message.id,
            version_number,
            "message version created"
        );

        Ok(MessageVersionResult {
            new_message,
            new_path: plan.new_path,
        })
    }

    /// Make `version_message_id` current again, restoring the path that was
    /// active alongside it.
    pub fn switch_to_message_version(
        &mut self,
        conversation_id: &str,
        version_message_id: &str,
    ) -> Result<SwitchOutcome> {
        let now = now_ms();
        let tx = self.db.conn.transaction()?;

        let conversation = load_conversation(&tx, conversation_id)?;
        let version = load_owned_message(&tx, conversation_id, version_message_id)?;

        let messages = messages_for_conversation(&tx, conversation_id)?;
        let children = branches::revision_children(&messages);
        let plan = branches::resolve_switch(&conversation, &version, &children);

        match plan.source {
            PathSource::Snapshot => {}
            PathSource::Reconstructed { ambiguous } => warn!(
                conversation_id,
                version_message_id,
                ambiguous,
                "no branch snapshot holds this version; rebuilt path from revision parents"
            ),
            PathSource::Singleton => warn!(
                conversation_id,
                version_message_id,
                "no branch snapshot or anchor for this version; path reset to the version alone"
            ),
        }

        update_conversation_path(
            &tx,
            conversation_id,
            &plan.path,
            plan.active_branch_id.as_deref(),
            now,
        )?;

        insert_conversation_op(
            &tx,
            conversation_id,
            "conversation.switched",
            &json!({
                "version_message_id": version_message_id,
                "active_branch_id": plan.active_branch_id.clone(),
                "source": plan.source,
            }),
            now,
        )?;

        tx.commit()?;
        debug!(conversation_id, version_message_id, source = ?plan.source, "switched message version");

        Ok(SwitchOutcome {
            path: plan.path,
            active_branch_id: plan.active_branch_id,
            source: plan.source,
        })
    }

    /// Start a new conversation from a copy of the source's active path up to
    /// and including `from_message_id`.
    ///
    /// Copies get fresh ids and a clean version history: no parents, no
    /// version groups, no branches.
    pub fn branch_conversation(
        &mut self,
        source_conversation_id: &str,
        from_message_id: &str,
    ) -> Result<Conversation> {
        let now = now_ms();
        let tx = self.db.conn.transaction()?;

        let source = load_conversation(&tx, source_conversation_id)?;
        let index = source
            .position_in_path(from_message_id)
            .ok_or_else(|| Error::MessageNotInPath {
                conversation_id: source_conversation_id.to_string(),
                message_id: from_message_id.to_string(),
            })?;

        let originals = source.path[..=index]
            .iter()
            .map(|message_id| load_message(&tx, message_id))
            .collect::<Result<Vec<_>>>()?;

        let mut conversation = Conversation {
            id: generate_id(&tx, "conv")?,
            project_id: source.project_id.clone(),
            title: source.title.as_ref().map(|title| format!("{title} (branch)")),
            path: Vec::with_capacity(originals.len()),
            branches: Vec::new(),
            active_branch_id: None,
            tags: source.tags.clone(),
            pinned: false,
            created_at_ms: now,
            updated_at_ms: now,
        };

        let mut copies = Vec::with_capacity(originals.len());
        for original in originals {
            let copy = Message {
                id: generate_id(&tx, "msg")?,
                conversation_id: conversation.id.clone(),
                parent_message_id: None,
                version_of: None,
                version_number: 1,
                branch_id: None,
                ..original
            };
            conversation.path.push(copy.id.clone());
            copies.push(copy);
        }

        insert_conversation(&tx, &conversation)?;
        for copy in &copies {
            insert_message(&tx, copy)?;
        }

        insert_conversation_op(
            &tx,
            &conversation.id,
            "conversation.branched",
            &json!({
                "source_conversation_id": source_conversation_id,
                "from_message_id": from_message_id,
                "copied": copies.len(),
            }),
            now,
        )?;

        tx.commit()?;
        debug!(
            source_conversation_id,
            conversation_id = %conversation.id,
            copied = copies.len(),
            "conversation branched"
        );
        Ok(conversation)
    }

    pub fn list_conversation_ops(
        &self,
        conversation_id: &str,
        after_seq: Option<i64>,
        limit: usize,
    ) -> Result<Vec<ConversationOp>> {
        let mut stmt = self.db.conn.prepare(
            "SELECT seq, conversation_id, op_type, payload_json, created_at_ms
             FROM conversation_ops
             WHERE conversation_id = ?1
               AND seq > COALESCE(?2, 0)
             ORDER BY seq ASC
             LIMIT ?3",
        )?;
        let iter = stmt.query_map(
            params![conversation_id, after_seq, limit as i64],
            row_to_conversation_op,
        )?;
        collect_rows(iter)
    }

    fn update_metadata<F>(
        &mut self,
        conversation_id: &str,
        payload: serde_json::Value,
        apply: F,
    ) -> Result<Conversation>
    where
        F: FnOnce(&rusqlite::Transaction<'_>, i64) -> Result<()>,
    {
        let now = now_ms();
        let tx = self.db.conn.transaction()?;

        load_conversation(&tx, conversation_id)?;
        apply(&tx, now)?;
        insert_conversation_op(&tx, conversation_id, "conversation.updated", &payload, now)?;

        let conversation = load_conversation(&tx, conversation_id)?;
        tx.commit()?;
        Ok(conversation)
    }
}

fn normalize_title(title: String) -> Option<String> {
    let title = title.trim();
    if title.is_empty() {
        None
    } else {
        Some(title.to_string())
    }
}

/// Trim, drop empties and de-duplicate, keeping first-seen order.
pub(crate) fn normalize_tags<I, S>(tags: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut normalized: Vec<String> = Vec::new();
    for tag in tags {
        let tag = tag.as_ref().trim();
        if !tag.is_empty() && !normalized.iter().any(|existing| existing == tag) {
            normalized.push(tag.to_string());
        }
    }
    normalized
}

fn row_to_conversation_op(row: &Row<'_>) -> rusqlite::Result<ConversationOp> {
    Ok(ConversationOp {
        seq: row.get(0)?,
        conversation_id: row.get(1)?,
        op_type: row.get(2)?,
        payload: parse_json_column(row, 3)?,
        created_at_ms: row.get(4)?,
    })
}
