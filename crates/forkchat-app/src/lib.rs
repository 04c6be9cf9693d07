use std::ffi::OsString;
use std::path::PathBuf;

use directories::ProjectDirs;

const APP_QUALIFIER: &str = "dev";
const APP_ORGANIZATION: &str = "forkchat";
const APP_NAME: &str = "forkchat";
const CONVERSATION_DB_FILENAME: &str = "conversations.sqlite3";

/// Overrides the data directory when set to a non-empty path.
pub const DATA_DIR_ENV: &str = "FORKCHAT_DATA_DIR";

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("could not resolve user data directory")]
    MissingUserDataDir,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// App-local user data directory (for durable application state).
pub fn user_data_dir() -> Result<PathBuf> {
    if let Some(dir) = data_dir_override(std::env::var_os(DATA_DIR_ENV)) {
        return Ok(dir);
    }

    let dirs = ProjectDirs::from(APP_QUALIFIER, APP_ORGANIZATION, APP_NAME)
        .ok_or(Error::MissingUserDataDir)?;
    Ok(dirs.data_local_dir().to_path_buf())
}

pub fn ensure_user_data_dir() -> Result<PathBuf> {
    let dir = user_data_dir()?;
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

pub fn db_path() -> Result<PathBuf> {
    Ok(ensure_user_data_dir()?.join(CONVERSATION_DB_FILENAME))
}

fn data_dir_override(value: Option<OsString>) -> Option<PathBuf> {
    value
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use std::ffi::OsString;
    use std::path::PathBuf;

    use super::data_dir_override;

    #[test]
    fn empty_override_is_ignored() {
        assert_eq!(data_dir_override(None), None);
        assert_eq!(data_dir_override(Some(OsString::new())), None);
        assert_eq!(
            data_dir_override(Some(OsString::from("/tmp/forkchat"))),
            Some(PathBuf::from("/tmp/forkchat"))
        );
    }
}
