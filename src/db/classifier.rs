//! Lexical SQL classification for read/write routing.
//!
//! Classification is lexical, not parsed. A statement is a write when, after
//! trimming and lowercasing, it starts with `update`, `insert`, `delete` or
//! `truncate`, or contains `for update` anywhere. Everything else reads.

/// Routing class of a SQL statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlKind {
    Read,
    Write,
}

impl SqlKind {
    pub fn is_write(&self) -> bool {
        matches!(self, Self::Write)
    }
}

const WRITE_PREFIXES: &[&str] = &["update", "insert", "delete", "truncate"];
const LOCKING_READ: &str = "for update";

/// Classify a statement. Empty input reads.
pub fn classify(sql: &str) -> SqlKind {
    let normalized = sql.trim().to_ascii_lowercase();
    if normalized.is_empty() {
        return SqlKind::Read;
    }

    if WRITE_PREFIXES.iter().any(|p| normalized.starts_with(p))
        || normalized.contains(LOCKING_READ)
    {
        SqlKind::Write
    } else {
        SqlKind::Read
    }
}

/// Shorthand for `classify(sql).is_write()`.
pub fn is_write(sql: &str) -> bool {
    classify(sql).is_write()
}
