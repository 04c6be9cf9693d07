use rusqlite::params;
use serde_json::json;
use tracing::debug;

use crate::branches;
use crate::database::Database;
use crate::error::Result;
use crate::models::{Attachment, DeleteOutcome, Message, NewMessage};
use crate::rows::{
    MESSAGE_COLUMNS, collect_rows, delete_messages, find_message, generate_id,
    insert_conversation_op, insert_message, load_conversation, load_message,
    messages_for_conversation, now_ms, row_to_message, to_json, touch_conversation,
    update_conversation_path,
};

pub struct Messages<'db> {
    pub(crate) db: &'db mut Database,
}

impl Messages<'_> {
    /// Append a new root message (version 1) to the conversation's active path.
    pub fn add_message(&mut self, conversation_id: &str, body: NewMessage) -> Result<Message> {
        let now = now_ms();
        let tx = self.db.conn.transaction()?;

        let conversation = load_conversation(&tx, conversation_id)?;

        let message = Message {
            id: generate_id(&tx, "msg")?,
            conversation_id: conversation.id.clone(),
            role: body.role,
            content: body.content,
            attachments: body.attachments,
            references: body.references,
            parent_message_id: None,
            version_of: None,
            version_number: 1,
            branch_id: conversation.active_branch_id.clone(),
            created_at_ms: now,
        };
        insert_message(&tx, &message)?;

        let mut path = conversation.path;
        path.push(message.id.clone());
        update_conversation_path(
            &tx,
            conversation_id,
            &path,
            conversation.active_branch_id.as_deref(),
            now,
        )?;

        insert_conversation_op(
            &tx,
            conversation_id,
            "message.added",
            &json!({
                "message_id": message.id.clone(),
                "role": message.role,
                "branch_id": message.branch_id.clone(),
            }),
            now,
        )?;

        tx.commit()?;
        debug!(conversation_id, message_id = %message.id, "message added");
        Ok(message)
    }

    /// Overwrite a message's content in place, without creating a version.
    ///
    /// `new_attachments` of `None` keeps the existing attachments.
    pub fn edit_message(
        &mut self,
        message_id: &str,
        new_content: &str,
        new_attachments: Option<Vec<Attachment>>,
    ) -> Result<Message> {
        let now = now_ms();
        let tx = self.db.conn.transaction()?;

        let mut message = load_message(&tx, message_id)?;
        message.content = new_content.to_string();
        if let Some(attachments) = new_attachments {
            message.attachments = attachments;
        }

        tx.execute(
            "UPDATE messages
             SET content = ?2, attachments_json = ?3
             WHERE id = ?1",
            params![message.id, message.content, to_json(&message.attachments)?],
        )?;
        touch_conversation(&tx, &message.conversation_id, now)?;

        insert_conversation_op(
            &tx,
            &message.conversation_id,
            "message.edited",
            &json!({ "message_id": message.id.clone() }),
            now,
        )?;

        tx.commit()?;
        debug!(message_id, "message edited in place");
        Ok(message)
    }

    pub fn get_message(&self, message_id: &str) -> Result<Option<Message>> {
        find_message(&self.db.conn, message_id)
    }

    /// The root message followed by every message recorded as a version of
    /// it, ascending by version number. Empty when the root does not exist.
    pub fn get_message_versions(&self, root_id: &str) -> Result<Vec<Message>> {
        let Some(root) = find_message(&self.db.conn, root_id)? else {
            return Ok(Vec::new());
        };

        let mut stmt = self.db.conn.prepare(&format!(
            "SELECT {MESSAGE_COLUMNS}
             FROM messages
             WHERE version_of = ?1
             ORDER BY version_number ASC"
        ))?;
        let iter = stmt.query_map(params![root_id], row_to_message)?;

        let mut versions = vec![root];
        versions.extend(collect_rows(iter)?);
        versions.sort_by_key(|message| message.version_number);
        Ok(versions)
    }

    /// Every record owned by the conversation, whether or not it is on the
    /// active path, in creation order.
    pub fn list_messages(&self, conversation_id: &str) -> Result<Vec<Message>> {
        load_conversation(&self.db.conn, conversation_id)?;
        messages_for_conversation(&self.db.conn, conversation_id)
    }

    /// Delete a message without breaking any recorded branch.
    ///
    /// Deleting a version reverts the conversation to a snapshot holding the
    /// version's parent. Otherwise the active path is cut at the message.
    /// Records still listed by some branch are kept either way.
    pub fn delete_message(&mut self, message_id: &str) -> Result<DeleteOutcome> {
        let now = now_ms();
        let tx = self.db.conn.transaction()?;

        let message = load_message(&tx, message_id)?;
        let conversation = load_conversation(&tx, &message.conversation_id)?;

        let plan = branches::plan_delete(&conversation, &message);

        update_conversation_path(
            &tx,
            &conversation.id,
            &plan.path,
            plan.active_branch_id.as_deref(),
            now,
        )?;
        delete_messages(&tx, &plan.delete)?;

        insert_conversation_op(
            &tx,
            &conversation.id,
            "message.deleted",
            &json!({
                "message_id": message_id,
                "mode": plan.mode,
                "deleted": plan.delete.clone(),
                "retained": plan.retain.clone(),
                "active_branch_id": plan.active_branch_id.clone(),
            }),
            now,
        )?;

        tx.commit()?;
        debug!(
            message_id,
            mode = ?plan.mode,
            deleted = plan.delete.len(),
            retained = plan.retain.len(),
            "message deleted"
        );

        Ok(DeleteOutcome {
            mode: plan.mode,
            path: plan.path,
            deleted: plan.delete,
            retained: plan.retain,
        })
    }
}
