use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Malformed connection descriptor: {0}")]
    MalformedConnection(String),

    #[error("Missing storage credentials for connection {host}: access and secret keys are required")]
    MissingCredentials { host: String },

    #[error("Invalid value for setting '{field}': {value}")]
    InvalidSetting { field: &'static str, value: String },

    #[error("Failed to list databases on {host}: {message}")]
    ListFailure { host: String, message: String },

    #[error("Failed to dump database {database}: {message}")]
    DumpFailure { database: String, message: String },

    #[error("Failed to archive {path}: {message}")]
    Archive { path: String, message: String },

    #[error("Failed to upload to s3://{bucket}/{key}: {message}")]
    UploadFailure { bucket: String, key: String, message: String },

    #[error("Retention failed for s3://{bucket}/{prefix}: {message}")]
    RetentionFailure { bucket: String, prefix: String, message: String },

    #[error("Storage operation failed: {0}")]
    Storage(String),

    #[error("Executable not found: {0}")]
    ToolNotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
}

pub type Result<T> = std::result::Result<T, AppError>;
