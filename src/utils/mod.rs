use std::path::PathBuf;

use which::which;

use crate::errors::{AppError, Result};

/// Finds a PostgreSQL client executable (`psql`, `pg_dump`) in the system PATH.
pub fn find_executable(name: &str) -> Result<PathBuf> {
    which(name).map_err(|_| {
        AppError::ToolNotFound(format!(
            "{} not found in PATH. Please ensure PostgreSQL client tools are installed and in your PATH.",
            name
        ))
    })
}

/// Turns a database name into something safe to use in a local file name.
pub fn local_file_stem(name: &str) -> String {
    let stem: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if stem.is_empty() { "database".to_string() } else { stem }
}
