//! Path forking and restoration.
//!
//! Everything here is pure: callers load a [`Conversation`] plus the message
//! records they need, ask for a plan, and apply it inside one transaction.
use std::collections::{HashMap, HashSet};

use crate::error::{Error, Result};
use crate::models::{Branch, Conversation, DeleteMode, Message, PathSource};

/// Fresh ids and clock reading for one fork, generated by the caller.
pub(crate) struct ForkIds<'a> {
    pub(crate) new_message_id: &'a str,
    pub(crate) old_branch_id: &'a str,
    pub(crate) new_branch_id: &'a str,
    pub(crate) now_ms: i64,
}

#[derive(Debug)]
pub(crate) struct ForkPlan {
    pub(crate) new_path: Vec<String>,
    /// Snapshot of the path as it was before the edit.
    pub(crate) old_branch: Branch,
    pub(crate) new_branch: Branch,
}

/// Fork `conversation` at `edited`, replacing it with a new version and
/// dropping everything after it from the active path.
pub(crate) fn plan_fork(
    conversation: &Conversation,
    edited: &Message,
    new_version_number: i64,
    ids: ForkIds<'_>,
) -> Result<ForkPlan> {
    let index = conversation
        .position_in_path(&edited.id)
        .ok_or_else(|| Error::MessageNotInPath {
            conversation_id: conversation.id.clone(),
            message_id: edited.id.clone(),
        })?;

    let mut new_path = conversation.path[..index].to_vec();
    new_path.push(ids.new_message_id.to_string());

    let old_branch = Branch {
        id: ids.old_branch_id.to_string(),
        name: format!("v{} (before edit)", edited.version_number),
        path: conversation.path.clone(),
        parent_version_id: edited.id.clone(),
        created_at_ms: ids.now_ms,
    };
    let new_branch = Branch {
        id: ids.new_branch_id.to_string(),
        name: format!("v{new_version_number}"),
        path: new_path.clone(),
        parent_version_id: edited.id.clone(),
        created_at_ms: ids.now_ms,
    };

    Ok(ForkPlan {
        new_path,
        old_branch,
        new_branch,
    })
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) struct SwitchPlan {
    pub(crate) path: Vec<String>,
    pub(crate) active_branch_id: Option<String>,
    pub(crate) source: PathSource,
}

/// Children keyed by `parent_message_id`, in creation order.
pub(crate) type RevisionChildren = HashMap<String, Vec<String>>;

pub(crate) fn revision_children<'a>(messages: impl IntoIterator<Item = &'a Message>) -> RevisionChildren {
    let mut children: RevisionChildren = HashMap::new();
    for message in messages {
        if let Some(parent) = &message.parent_message_id {
            children
                .entry(parent.clone())
                .or_default()
                .push(message.id.clone());
        }
    }
    children
}

/// Work out which path to restore when `version` becomes current again.
///
/// A recorded snapshot always wins: first the branch that last claimed the
/// message, then the most recent branch whose path holds it. Without one the
/// path is rebuilt around the version's parent in the current path.
pub(crate) fn resolve_switch(
    conversation: &Conversation,
    version: &Message,
    children: &RevisionChildren,
) -> SwitchPlan {
    if let Some(branch) = snapshot_for(conversation, version) {
        return SwitchPlan {
            path: branch.path.clone(),
            active_branch_id: Some(branch.id.clone()),
            source: PathSource::Snapshot,
        };
    }

    let anchor = version.parent_message_id.as_deref().unwrap_or(&version.id);
    let Some(anchor_index) = conversation.position_in_path(anchor) else {
        return SwitchPlan {
            path: vec![version.id.clone()],
            active_branch_id: None,
            source: PathSource::Singleton,
        };
    };

    let mut path = conversation.path[..anchor_index].to_vec();
    path.push(version.id.clone());
    let ambiguous = extend_with_descendants(&mut path, &version.id, children);

    SwitchPlan {
        path,
        active_branch_id: None,
        source: PathSource::Reconstructed { ambiguous },
    }
}

fn snapshot_for<'c>(conversation: &'c Conversation, version: &Message) -> Option<&'c Branch> {
    version
        .branch_id
        .as_deref()
        .and_then(|branch_id| conversation.branch(branch_id))
        .filter(|branch| branch.contains(&version.id))
        .or_else(|| {
            conversation
                .branches
                .iter()
                .rev()
                .find(|branch| branch.contains(&version.id))
        })
}

// Follows revisions below `start` while the chain is linear. Returns true
// when it stopped at a message with more than one revision: picking either
// side would invent a timeline nobody recorded.
fn extend_with_descendants(
    path: &mut Vec<String>,
    start: &str,
    children: &RevisionChildren,
) -> bool {
    let mut seen: HashSet<String> = path.iter().cloned().collect();
    let mut current = start.to_string();

    loop {
        let next: Vec<&String> = children
            .get(&current)
            .map(|ids| ids.iter().filter(|id| !seen.contains(*id)).collect())
            .unwrap_or_default();

        match next.as_slice() {
            [] => return false,
            [only] => {
                let only = (*only).clone();
                seen.insert(only.clone());
                path.push(only.clone());
                current = only;
            }
            _ => return true,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) struct DeletePlan {
    pub(crate) mode: DeleteMode,
    pub(crate) path: Vec<String>,
    pub(crate) active_branch_id: Option<String>,
    pub(crate) delete: Vec<String>,
    pub(crate) retain: Vec<String>,
}

/// Decide what deleting `message` does to `conversation`.
///
/// Deleting a version reverts to a snapshot holding its parent. Anything
/// else truncates the active path at the message. In both cases a record
/// survives while any branch still lists it.
pub(crate) fn plan_delete(conversation: &Conversation, message: &Message) -> DeletePlan {
    let referenced: HashSet<&str> = conversation
        .branches
        .iter()
        .flat_map(|branch| branch.path.iter().map(String::as_str))
        .collect();

    if let Some(branch) = revert_target(conversation, message) {
        let (delete, retain) = split_by_reference(vec![message.id.clone()], &referenced);
        return DeletePlan {
            mode: DeleteMode::Revert,
            path: branch.path.clone(),
            active_branch_id: Some(branch.id.clone()),
            delete,
            retain,
        };
    }

    let (path, removed) = match conversation.position_in_path(&message.id) {
        Some(index) => (
            conversation.path[..index].to_vec(),
            conversation.path[index..].to_vec(),
        ),
        None => (conversation.path.clone(), vec![message.id.clone()]),
    };
    let (delete, retain) = split_by_reference(removed, &referenced);

    DeletePlan {
        mode: DeleteMode::Cascade,
        path,
        active_branch_id: conversation.active_branch_id.clone(),
        delete,
        retain,
    }
}

// Prefer the latest snapshot that holds the parent without the version
// being deleted; fall back to the latest one holding the parent at all.
fn revert_target<'c>(conversation: &'c Conversation, message: &Message) -> Option<&'c Branch> {
    let parent = message.parent_message_id.as_deref()?;
    let candidates = || {
        conversation
            .branches
            .iter()
            .rev()
            .filter(move |branch| branch.contains(parent))
    };
    candidates()
        .find(|branch| !branch.contains(&message.id))
        .or_else(|| candidates().next())
}

fn split_by_reference(
    removed: Vec<String>,
    referenced: &HashSet<&str>,
) -> (Vec<String>, Vec<String>) {
    removed
        .into_iter()
        .partition(|id| !referenced.contains(id.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;

    fn message(id: &str, parent: Option<&str>) -> Message {
        Message {
            id: id.to_string(),
            conversation_id: "conv".to_string(),
            role: Role::User,
            content: id.to_string(),
            attachments: Vec::new(),
            references: Vec::new(),
            parent_message_id: parent.map(str::to_string),
            version_of: parent.map(str::to_string),
            version_number: if parent.is_some() { 2 } else { 1 },
            branch_id: None,
            created_at_ms: 0,
        }
    }

    fn branch(id: &str, path: &[&str]) -> Branch {
        Branch {
            id: id.to_string(),
            name: id.to_string(),
            path: ids(path),
            parent_version_id: path.first().map(|id| id.to_string()).unwrap_or_default(),
            created_at_ms: 0,
        }
    }

    fn ids(values: &[&str]) -> Vec<String> {
        values.iter().map(|id| id.to_string()).collect()
    }

    fn conversation(path: &[&str], branches: Vec<Branch>) -> Conversation {
        Conversation {
            id: "conv".to_string(),
            project_id: None,
            title: None,
            path: ids(path),
            branches,
            active_branch_id: None,
            tags: Vec::new(),
            pinned: false,
            created_at_ms: 0,
            updated_at_ms: 0,
        }
    }

    fn fork_ids(now_ms: i64) -> ForkIds<'static> {
        ForkIds {
            new_message_id: "m2b",
            old_branch_id: "br_old",
            new_branch_id: "br_new",
            now_ms,
        }
    }

    #[test]
    fn fork_truncates_after_edited_message() {
        let conv = conversation(&["m1", "m2", "m3"], Vec::new());
        let plan = plan_fork(&conv, &message("m2", None), 2, fork_ids(7)).expect("fork");

        assert_eq!(plan.new_path, ids(&["m1", "m2b"]));
        assert_eq!(plan.old_branch.path, ids(&["m1", "m2", "m3"]));
        assert_eq!(plan.new_branch.path, plan.new_path);
        assert_eq!(plan.old_branch.parent_version_id, "m2");
        assert_eq!(plan.new_branch.parent_version_id, "m2");
        assert_eq!(plan.old_branch.name, "v1 (before edit)");
        assert_eq!(plan.new_branch.name, "v2");
        assert_eq!(plan.new_branch.created_at_ms, 7);
    }

    #[test]
    fn fork_of_last_message_keeps_both_snapshots() {
        let conv = conversation(&["m1", "m2"], Vec::new());
        let plan = plan_fork(&conv, &message("m2", None), 2, fork_ids(0)).expect("fork");

        assert_eq!(plan.old_branch.path.len(), 2);
        assert_eq!(plan.new_path, ids(&["m1", "m2b"]));
    }

    #[test]
    fn fork_rejects_message_outside_path() {
        let conv = conversation(&["m1"], Vec::new());
        let err = plan_fork(&conv, &message("m9", None), 2, fork_ids(0)).unwrap_err();
        assert!(matches!(err, Error::MessageNotInPath { .. }));
    }

    #[test]
    fn switch_prefers_claiming_branch() {
        let conv = conversation(
            &["m1", "m2b"],
            vec![branch("b1", &["m1", "m2", "m3"]), branch("b2", &["m1", "m2b"])],
        );
        let mut target = message("m2", None);
        target.branch_id = Some("b1".to_string());

        let plan = resolve_switch(&conv, &target, &RevisionChildren::new());
        assert_eq!(plan.path, ids(&["m1", "m2", "m3"]));
        assert_eq!(plan.active_branch_id.as_deref(), Some("b1"));
        assert_eq!(plan.source, PathSource::Snapshot);
    }

    #[test]
    fn switch_falls_back_to_latest_branch_containing_message() {
        let conv = conversation(
            &["m1"],
            vec![branch("b1", &["m1", "m2"]), branch("b3", &["m1", "m2", "m4"])],
        );
        let mut target = message("m2", None);
        target.branch_id = Some("gone".to_string());

        let plan = resolve_switch(&conv, &target, &RevisionChildren::new());
        assert_eq!(plan.active_branch_id.as_deref(), Some("b3"));
        assert_eq!(plan.path, ids(&["m1", "m2", "m4"]));
    }

    #[test]
    fn switch_reconstructs_linear_descendants() {
        let conv = conversation(&["m1", "m2", "m3"], Vec::new());
        let v2 = message("m2b", Some("m2"));
        let v3 = message("m2c", Some("m2b"));
        let children = revision_children([&v2, &v3]);

        let plan = resolve_switch(&conv, &v2, &children);
        assert_eq!(plan.path, ids(&["m1", "m2b", "m2c"]));
        assert_eq!(plan.active_branch_id, None);
        assert_eq!(plan.source, PathSource::Reconstructed { ambiguous: false });
    }

    #[test]
    fn switch_reconstruction_stops_at_forked_descendants() {
        let conv = conversation(&["m1", "m2"], Vec::new());
        let v2 = message("m2b", Some("m2"));
        let left = message("m2c", Some("m2b"));
        let right = message("m2d", Some("m2b"));
        let children = revision_children([&v2, &left, &right]);

        let plan = resolve_switch(&conv, &v2, &children);
        assert_eq!(plan.path, ids(&["m1", "m2b"]));
        assert_eq!(plan.source, PathSource::Reconstructed { ambiguous: true });
    }

    #[test]
    fn switch_without_anchor_is_singleton() {
        let conv = conversation(&["m1"], Vec::new());
        let plan = resolve_switch(&conv, &message("m7", Some("m6")), &RevisionChildren::new());
        assert_eq!(plan.path, ids(&["m7"]));
        assert_eq!(plan.source, PathSource::Singleton);
    }

    #[test]
    fn delete_version_reverts_to_parent_snapshot() {
        let conv = conversation(
            &["m1", "m2b"],
            vec![branch("b1", &["m1", "m2", "m3"]), branch("b2", &["m1", "m2b"])],
        );
        let plan = plan_delete(&conv, &message("m2b", Some("m2")));

        assert_eq!(plan.mode, DeleteMode::Revert);
        assert_eq!(plan.path, ids(&["m1", "m2", "m3"]));
        assert_eq!(plan.active_branch_id.as_deref(), Some("b1"));
        assert!(plan.delete.is_empty());
        assert_eq!(plan.retain, ids(&["m2b"]));
    }

    #[test]
    fn delete_root_cascades_and_keeps_referenced() {
        let conv = conversation(&["m1", "m2", "m3"], vec![branch("b1", &["m1", "m2"])]);
        let plan = plan_delete(&conv, &message("m1", None));

        assert_eq!(plan.mode, DeleteMode::Cascade);
        assert!(plan.path.is_empty());
        assert_eq!(plan.delete, ids(&["m3"]));
        assert_eq!(plan.retain, ids(&["m1", "m2"]));
    }

    #[test]
    fn delete_off_path_message_only_touches_itself() {
        let conv = conversation(&["m1", "m2b"], vec![branch("b1", &["m1", "m2", "m3"])]);
        let plan = plan_delete(&conv, &message("m3", None));

        assert_eq!(plan.path, ids(&["m1", "m2b"]));
        assert!(plan.delete.is_empty());
        assert_eq!(plan.retain, ids(&["m3"]));
    }
}
