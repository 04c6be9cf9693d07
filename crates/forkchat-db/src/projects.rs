use rusqlite::params;
use tracing::debug;

use crate::database::Database;
use crate::error::{Error, Result};
use crate::models::Project;
use crate::rows::{collect_rows, find_project, generate_id, now_ms, row_to_project};

pub struct Projects<'db> {
    pub(crate) db: &'db mut Database,
}

impl Projects<'_> {
    pub fn create_project(&mut self, name: &str) -> Result<Project> {
        let name = validate_name(name)?;
        let now = now_ms();
        let tx = self.db.conn.transaction()?;

        let id = generate_id(&tx, "proj")?;
        tx.execute(
            "INSERT INTO projects (id, name, created_at_ms, updated_at_ms)
             VALUES (?1, ?2, ?3, ?4)",
            params![id, name, now, now],
        )?;

        tx.commit()?;
        debug!(project_id = %id, "project created");
        Ok(Project {
            id,
            name,
            created_at_ms: now,
            updated_at_ms: now,
        })
    }

    pub fn get_project(&self, project_id: &str) -> Result<Option<Project>> {
        find_project(&self.db.conn, project_id)
    }

    pub fn list_projects(&self) -> Result<Vec<Project>> {
        let mut stmt = self.db.conn.prepare(
            "SELECT id, name, created_at_ms, updated_at_ms
             FROM projects
             ORDER BY name COLLATE NOCASE ASC, created_at_ms ASC",
        )?;
        let iter = stmt.query_map([], row_to_project)?;
        collect_rows(iter)
    }

    pub fn rename_project(&mut self, project_id: &str, name: &str) -> Result<Project> {
        let name = validate_name(name)?;
        let now = now_ms();
        let tx = self.db.conn.transaction()?;

        let changed = tx.execute(
            "UPDATE projects
             SET name = ?2, updated_at_ms = ?3
             WHERE id = ?1",
            params![project_id, name, now],
        )?;
        if changed == 0 {
            return Err(Error::ProjectNotFound(project_id.to_string()));
        }

        let project = find_project(&tx, project_id)?
            .ok_or_else(|| Error::ProjectNotFound(project_id.to_string()))?;
        tx.commit()?;
        Ok(project)
    }
}

fn validate_name(name: &str) -> Result<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(Error::InvalidInput("project name must not be empty".to_string()));
    }
    Ok(name.to_string())
}
