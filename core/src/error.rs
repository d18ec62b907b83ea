use thiserror::Error;

/// Failures surfaced by the tracker. Every Data Store failure maps onto one of these and is
/// returned to the caller; nothing is retried.
#[derive(Debug, Error)]
pub enum TrackerError {
    /// The Data Store (or auth backend) could not be reached or failed internally.
    #[error("data store unavailable: {0}")]
    Connectivity(String),

    /// A store-side CHECK, NOT NULL or foreign-key constraint rejected the write.
    #[error("constraint violated: {0}")]
    Constraint(String),

    /// A uniqueness constraint rejected the write, e.g. a second goal for the same day.
    #[error("already exists: {0}")]
    Duplicate(String),

    /// Input rejected client-side before any store call was made.
    #[error("invalid input: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// Missing, expired or rejected credentials.
    #[error("authentication failed: {0}")]
    Auth(String),
}

impl TrackerError {
    /// Any store-side constraint, uniqueness included.
    #[must_use]
    pub fn is_constraint(&self) -> bool {
        matches!(self, Self::Constraint(_) | Self::Duplicate(_))
    }

    #[must_use]
    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::Duplicate(_))
    }

    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl From<rusqlite::Error> for TrackerError {
    fn from(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::QueryReturnedNoRows => Self::NotFound("no matching row".to_string()),
            rusqlite::Error::SqliteFailure(code, msg)
                if code.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                let msg = msg.unwrap_or_else(|| code.to_string());
                match code.extended_code {
                    rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                    | rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY => Self::Duplicate(msg),
                    _ => Self::Constraint(msg),
                }
            }
            other => Self::Connectivity(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for TrackerError {
    fn from(err: serde_json::Error) -> Self {
        Self::Connectivity(format!("malformed row: {err}"))
    }
}

pub type Result<T, E = TrackerError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_rows_maps_to_not_found() {
        let err = TrackerError::from(rusqlite::Error::QueryReturnedNoRows);
        assert!(err.is_not_found());
    }

    #[test]
    fn test_unique_violation_maps_to_constraint() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (k TEXT UNIQUE); INSERT INTO t VALUES ('a');")
            .unwrap();
        let err = TrackerError::from(conn.execute("INSERT INTO t VALUES ('a')", []).unwrap_err());
        assert!(err.is_duplicate());
        assert!(err.is_constraint());
    }

    #[test]
    fn test_check_violation_is_not_duplicate() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (n INTEGER CHECK (n > 0));").unwrap();
        let err = TrackerError::from(conn.execute("INSERT INTO t VALUES (0)", []).unwrap_err());
        assert!(err.is_constraint());
        assert!(!err.is_duplicate());
    }
}
