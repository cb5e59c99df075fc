#[derive(thiserror::Error, Debug)]
pub enum GridError {
    #[error("Invalid tag expression '{expression}': {message} at position {position}")]
    TagParse {
        expression: String,
        message: String,
        position: usize,
    },

    #[error("No scenarios survived filtering: nothing to run")]
    NothingToRun,

    #[error("Device pool '{pool}' is empty")]
    EmptyPool { pool: String },

    #[error("Missing required capability field '{key}'")]
    MissingCapability { key: String },

    #[error("Failed to parse feature '{path}' at line {line}: {message}")]
    FeatureParse {
        path: String,
        line: usize,
        message: String,
    },

    #[error("Lock on pool '{pool}' not acquired after {attempts} attempts")]
    LockExhausted { pool: String, attempts: u32 },

    #[error("Session backend error: {0}")]
    SessionBackend(String),

    #[error("Configuration error: {0}")]
    Config(String),
}
