use std::time::{SystemTime, UNIX_EPOCH};

use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{Error, Result};
use crate::models::{Branch, Conversation, Message, Project};

pub(crate) const MESSAGE_COLUMNS: &str = "id, conversation_id, role, content, attachments_json, references_json,
     parent_message_id, version_of, version_number, branch_id, created_at_ms";

const CONVERSATION_COLUMNS: &str = "id, project_id, title, path_json, active_branch_id, tags_json, pinned,
     created_at_ms, updated_at_ms";

pub(crate) fn load_conversation(conn: &Connection, conversation_id: &str) -> Result<Conversation> {
    find_conversation(conn, conversation_id)?
        .ok_or_else(|| Error::ConversationNotFound(conversation_id.to_string()))
}

pub(crate) fn find_conversation(
    conn: &Connection,
    conversation_id: &str,
) -> Result<Option<Conversation>> {
    let conversation = conn
        .query_row(
            &format!("SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = ?1"),
            params![conversation_id],
            row_to_conversation,
        )
        .optional()?;

    match conversation {
        Some(mut conversation) => {
            conversation.branches = load_branches(conn, conversation_id)?;
            Ok(Some(conversation))
        }
        None => Ok(None),
    }
}

pub(crate) fn list_conversations(
    conn: &Connection,
    project_id: Option<&str>,
    limit: usize,
) -> Result<Vec<Conversation>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {CONVERSATION_COLUMNS}
         FROM conversations
         WHERE ?1 IS NULL OR project_id = ?1
         ORDER BY pinned DESC, updated_at_ms DESC
         LIMIT ?2"
    ))?;
    let iter = stmt.query_map(params![project_id, limit as i64], row_to_conversation)?;
    let mut conversations = collect_rows(iter)?;
    for conversation in &mut conversations {
        conversation.branches = load_branches(conn, &conversation.id)?;
    }
    Ok(conversations)
}

fn load_branches(conn: &Connection, conversation_id: &str) -> Result<Vec<Branch>> {
    let mut stmt = conn.prepare(
        "SELECT id, name, path_json, parent_version_id, created_at_ms
         FROM branches
         WHERE conversation_id = ?1
         ORDER BY seq ASC",
    )?;
    let iter = stmt.query_map(params![conversation_id], |row| {
        Ok(Branch {
            id: row.get(0)?,
            name: row.get(1)?,
            path: parse_json_column(row, 2)?,
            parent_version_id: row.get(3)?,
            created_at_ms: row.get(4)?,
        })
    })?;
    collect_rows(iter)
}

pub(crate) fn insert_conversation(conn: &Connection, conversation: &Conversation) -> Result<()> {
    conn.execute(
        "INSERT INTO conversations (
            id, project_id, title, path_json, active_branch_id, tags_json, pinned,
            created_at_ms, updated_at_ms
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            conversation.id,
            conversation.project_id,
            conversation.title,
            to_json(&conversation.path)?,
            conversation.active_branch_id,
            to_json(&conversation.tags)?,
            conversation.pinned,
            conversation.created_at_ms,
            conversation.updated_at_ms
        ],
    )?;
    Ok(())
}

/// Persist the active path and branch pointer, bumping `updated_at_ms`.
pub(crate) fn update_conversation_path(
    conn: &Connection,
    conversation_id: &str,
    path: &[String],
    active_branch_id: Option<&str>,
    now: i64,
) -> Result<()> {
    conn.execute(
        "UPDATE conversations
         SET path_json = ?2, active_branch_id = ?3, updated_at_ms = ?4
         WHERE id = ?1",
        params![conversation_id, to_json(path)?, active_branch_id, now],
    )?;
    Ok(())
}

pub(crate) fn touch_conversation(conn: &Connection, conversation_id: &str, now: i64) -> Result<()> {
    conn.execute(
        "UPDATE conversations SET updated_at_ms = ?2 WHERE id = ?1",
        params![conversation_id, now],
    )?;
    Ok(())
}

pub(crate) fn append_branch(conn: &Connection, conversation_id: &str, branch: &Branch) -> Result<()> {
    conn.execute(
        "INSERT INTO branches (
            id, conversation_id, seq, name, path_json, parent_version_id, created_at_ms
         ) VALUES (
            ?1, ?2,
            (SELECT COALESCE(MAX(seq), 0) + 1 FROM branches WHERE conversation_id = ?2),
            ?3, ?4, ?5, ?6
         )",
        params![
            branch.id,
            conversation_id,
            branch.name,
            to_json(&branch.path)?,
            branch.parent_version_id,
            branch.created_at_ms
        ],
    )?;
    Ok(())
}

pub(crate) fn load_message(conn: &Connection, message_id: &str) -> Result<Message> {
    find_message(conn, message_id)?.ok_or_else(|| Error::MessageNotFound(message_id.to_string()))
}

pub(crate) fn find_message(conn: &Connection, message_id: &str) -> Result<Option<Message>> {
    conn.query_row(
        &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
        params![message_id],
        row_to_message,
    )
    .optional()
    .map_err(Error::from)
}

/// Load a message and check it is owned by `conversation_id`.
pub(crate) fn load_owned_message(
    conn: &Connection,
    conversation_id: &str,
    message_id: &str,
) -> Result<Message> {
    let message = load_message(conn, message_id)?;
    if message.conversation_id != conversation_id {
        return Err(Error::MessageConversationMismatch {
            conversation_id: conversation_id.to_string(),
            message_id: message_id.to_string(),
        });
    }
    Ok(message)
}

pub(crate) fn messages_for_conversation(
    conn: &Connection,
    conversation_id: &str,
) -> Result<Vec<Message>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {MESSAGE_COLUMNS}
         FROM messages
         WHERE conversation_id = ?1
         ORDER BY created_at_ms ASC, rowid ASC"
    ))?;
    let iter = stmt.query_map(params![conversation_id], row_to_message)?;
    collect_rows(iter)
}

pub(crate) fn insert_message(conn: &Connection, message: &Message) -> Result<()> {
    conn.execute(
        &format!(
            "INSERT INTO messages ({MESSAGE_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
        ),
        params![
            message.id,
            message.conversation_id,
            message.role.as_str(),
            message.content,
            to_json(&message.attachments)?,
            to_json(&message.references)?,
            message.parent_message_id,
            message.version_of,
            message.version_number,
            message.branch_id,
            message.created_at_ms
        ],
    )?;
    Ok(())
}

pub(crate) fn delete_messages(conn: &Connection, message_ids: &[String]) -> Result<()> {
    let mut stmt = conn.prepare("DELETE FROM messages WHERE id = ?1")?;
    for id in message_ids {
        stmt.execute(params![id])?;
    }
    Ok(())
}

pub(crate) fn retag_messages(conn: &Connection, message_ids: &[String], branch_id: &str) -> Result<()> {
    let mut stmt = conn.prepare("UPDATE messages SET branch_id = ?2 WHERE id = ?1")?;
    for id in message_ids {
        stmt.execute(params![id, branch_id])?;
    }
    Ok(())
}

pub(crate) fn find_project(conn: &Connection, project_id: &str) -> Result<Option<Project>> {
    conn.query_row(
        "SELECT id, name, created_at_ms, updated_at_ms FROM projects WHERE id = ?1",
        params![project_id],
        row_to_project,
    )
    .optional()
    .map_err(Error::from)
}

pub(crate) fn ensure_project_exists(conn: &Connection, project_id: &str) -> Result<()> {
    let exists = conn
        .query_row(
            "SELECT EXISTS(SELECT 1 FROM projects WHERE id = ?1)",
            params![project_id],
            |row| row.get::<_, i64>(0),
        )
        .map(|n| n != 0)?;
    if exists {
        Ok(())
    } else {
        Err(Error::ProjectNotFound(project_id.to_string()))
    }
}

pub(crate) fn insert_conversation_op(
    conn: &Connection,
    conversation_id: &str,
    op_type: &str,
    payload: &serde_json::Value,
    created_at_ms: i64,
) -> Result<()> {
    conn.execute(
        "INSERT INTO conversation_ops (conversation_id, op_type, payload_json, created_at_ms)
         VALUES (?1, ?2, ?3, ?4)",
        params![
            conversation_id,
            op_type,
            serde_json::to_string(payload)?,
            created_at_ms
        ],
    )?;
    Ok(())
}

pub(crate) fn generate_id(conn: &Connection, prefix: &str) -> rusqlite::Result<String> {
    conn.query_row("SELECT lower(hex(randomblob(16)))", [], |row| {
        let suffix: String = row.get(0)?;
        Ok(format!("{prefix}_{suffix}"))
    })
}

pub(crate) fn row_to_project(row: &Row<'_>) -> rusqlite::Result<Project> {
    Ok(Project {
        id: row.get(0)?,
        name: row.get(1)?,
        created_at_ms: row.get(2)?,
        updated_at_ms: row.get(3)?,
    })
}

fn row_to_conversation(row: &Row<'_>) -> rusqlite::Result<Conversation> {
    Ok(Conversation {
        id: row.get(0)?,
        project_id: row.get(1)?,
        title: row.get(2)?,
        path: parse_json_column(row, 3)?,
        branches: Vec::new(),
        active_branch_id: row.get(4)?,
        tags: parse_json_column(row, 5)?,
        pinned: row.get(6)?,
        created_at_ms: row.get(7)?,
        updated_at_ms: row.get(8)?,
    })
}

pub(crate) fn row_to_message(row: &Row<'_>) -> rusqlite::Result<Message> {
    let role: String = row.get(2)?;
    Ok(Message {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        role: role
            .parse()
            .map_err(|e: String| rusqlite::Error::FromSqlConversionFailure(2, Type::Text, e.into()))?,
        content: row.get(3)?,
        attachments: parse_json_column(row, 4)?,
        references: parse_json_column(row, 5)?,
        parent_message_id: row.get(6)?,
        version_of: row.get(7)?,
        version_number: row.get(8)?,
        branch_id: row.get(9)?,
        created_at_ms: row.get(10)?,
    })
}

pub(crate) fn parse_json_column<T: DeserializeOwned>(
    row: &Row<'_>,
    idx: usize,
) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub(crate) fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

pub(crate) fn collect_rows<T, F>(iter: rusqlite::MappedRows<'_, F>) -> Result<Vec<T>>
where
    F: FnMut(&Row<'_>) -> rusqlite::Result<T>,
{
    let mut rows = Vec::new();
    for row in iter {
        rows.push(row?);
    }
    Ok(rows)
}

pub(crate) fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
