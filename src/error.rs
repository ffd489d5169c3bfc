use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Catalog query failed: {}", with_sources(.0))]
    Postgres(#[from] tokio_postgres::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Dependency discovery error: {0}")]
    Dependency(String),

    #[error("{program} failed ({status}): {stderr}")]
    Collaborator {
        program: String,
        status: String,
        stderr: String,
    },

    #[error("Catalog row error: {0}")]
    Catalog(String),

    #[error("Output assembly error: {0}")]
    Assembly(String),
}

impl Error {
    pub fn error_code(&self) -> i32 {
        match self {
            Error::Io(_) => -1,
            Error::Postgres(_) => -2,
            Error::Json(_) => -3,
            Error::Config(_) => -4,
            Error::Dependency(_) => -5,
            Error::Collaborator { .. } => -6,
            Error::Catalog(_) => -7,
            Error::Assembly(_) => -8,
        }
    }
}

/// Append each distinct source message to the error's own text. Driver errors
/// keep the server's message (severity, detail, hint) only in their source.
fn with_sources(error: &dyn std::error::Error) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !message.contains(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = cause.source();
    }
    message
}
