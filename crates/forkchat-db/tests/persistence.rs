use forkchat_db::{CreateConversationInput, NewMessage, PathSource, SCHEMA_VERSION, Store};
use rusqlite::{Connection, params};
use tempfile::tempdir;

struct Forked {
    conversation_id: String,
    m1: String,
    m2: String,
    m3: String,
    m2b: String,
}

fn seed_forked(store: &mut Store) -> Forked {
    let conversation_id = store
        .conversations()
        .create_conversation(CreateConversationInput {
            title: Some("Recipes".to_string()),
            project_id: None,
        })
        .expect("create conversation")
        .id;

    let mut add = |content: &str| {
        store
            .messages()
            .add_message(&conversation_id, NewMessage::user(content))
            .expect("add message")
            .id
    };
    let m1 = add("dinner ideas?");
    let m2 = add("something vegetarian");
    let m3 = add("under 30 minutes");

    let m2b = store
        .conversations()
        .create_message_version(&conversation_id, &m2, "something with fish", None, None)
        .expect("create version")
        .new_message
        .id;

    Forked {
        conversation_id,
        m1,
        m2,
        m3,
        m2b,
    }
}

#[test]
fn reopening_keeps_paths_branches_and_schema() {
    let dir = tempdir().expect("tempdir");
    let db_path = dir.path().join("nested").join("conversations.sqlite3");

    let forked = {
        let mut store = Store::open(&db_path).expect("open store");
        assert_eq!(store.schema_version().expect("version"), SCHEMA_VERSION);
        seed_forked(&mut store)
    };

    let mut store = Store::open(&db_path).expect("reopen store");
    assert_eq!(store.schema_version().expect("version"), SCHEMA_VERSION);

    let conversation = store
        .conversations()
        .get_conversation(&forked.conversation_id)
        .expect("get")
        .expect("exists");
    assert_eq!(conversation.path, vec![forked.m1.clone(), forked.m2b.clone()]);
    assert_eq!(conversation.branches.len(), 2);

    let outcome = store
        .conversations()
        .switch_to_message_version(&forked.conversation_id, &forked.m2)
        .expect("switch");
    assert_eq!(outcome.path, vec![forked.m1, forked.m2, forked.m3]);
}

#[test]
fn branch_snapshots_cannot_be_rewritten() {
    let dir = tempdir().expect("tempdir");
    let db_path = dir.path().join("conversations.sqlite3");

    let forked = {
        let mut store = Store::open(&db_path).expect("open store");
        seed_forked(&mut store)
    };

    let conn = Connection::open(&db_path).expect("open raw connection");
    let result = conn.execute(
        "UPDATE branches SET path_json = '[]' WHERE conversation_id = ?1",
        params![forked.conversation_id],
    );
    assert!(result.is_err(), "branch snapshots must reject updates");
}

#[test]
fn duplicate_version_numbers_are_rejected_by_the_schema() {
    let dir = tempdir().expect("tempdir");
    let db_path = dir.path().join("conversations.sqlite3");

    let forked = {
        let mut store = Store::open(&db_path).expect("open store");
        seed_forked(&mut store)
    };

    let conn = Connection::open(&db_path).expect("open raw connection");
    let result = conn.execute(
        "INSERT INTO messages (
            id, conversation_id, role, content, parent_message_id, version_of,
            version_number, created_at_ms
         ) VALUES ('msg_dup', ?1, 'user', 'dup', ?2, ?2, 2, 0)",
        params![forked.conversation_id, forked.m2],
    );
    assert!(result.is_err(), "two messages in one group cannot share a version number");
}

#[test]
fn switch_without_snapshot_rebuilds_from_parent() {
    let dir = tempdir().expect("tempdir");
    let db_path = dir.path().join("conversations.sqlite3");

    let forked = {
        let mut store = Store::open(&db_path).expect("open store");
        seed_forked(&mut store)
    };

    // Simulate a version whose snapshots were never recorded.
    {
        let conn = Connection::open(&db_path).expect("open raw connection");
        conn.execute(
            "DELETE FROM branches WHERE conversation_id = ?1",
            params![forked.conversation_id],
        )
        .expect("drop branches");
        let path = serde_json::to_string(&[&forked.m1, &forked.m2, &forked.m3]).expect("json");
        conn.execute(
            "UPDATE conversations SET path_json = ?2, active_branch_id = NULL WHERE id = ?1",
            params![forked.conversation_id, path],
        )
        .expect("reset path");
    }

    let mut store = Store::open(&db_path).expect("reopen store");
    let outcome = store
        .conversations()
        .switch_to_message_version(&forked.conversation_id, &forked.m2b)
        .expect("switch");

    assert_eq!(outcome.source, PathSource::Reconstructed { ambiguous: false });
    assert_eq!(outcome.path, vec![forked.m1, forked.m2b]);
    assert_eq!(outcome.active_branch_id, None);
}
