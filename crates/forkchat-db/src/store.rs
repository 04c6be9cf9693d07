use std::path::Path;

use crate::conversations::Conversations;
use crate::database::Database;
use crate::error::Result;
use crate::messages::Messages;
use crate::projects::Projects;

/// Handle to one conversation database.
///
/// Each handle owns its connection; open as many independent stores as needed.
pub struct Store {
    db: Database,
}

impl Store {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self {
            db: Database::open(path.as_ref())?,
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self {
            db: Database::open_in_memory()?,
        })
    }

    pub fn schema_version(&self) -> Result<i64> {
        self.db.schema_version()
    }

    pub fn conversations(&mut self) -> Conversations<'_> {
        Conversations { db: &mut self.db }
    }

    pub fn messages(&mut self) -> Messages<'_> {
        Messages { db: &mut self.db }
    }

    pub fn projects(&mut self) -> Projects<'_> {
        Projects { db: &mut self.db }
    }
}
