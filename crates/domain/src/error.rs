/// Shared error type used across all aria-server crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("timeout: {0}")]
    Timeout(String),

    /// Malformed or unknown inbound client message. The hub logs it, sends
    /// a single `error` frame, and keeps the connection.
    #[error("client protocol: {0}")]
    Protocol(String),

    /// A provider stream or tool subprocess failed mid-call.
    #[error("provider {provider}: {message}")]
    Provider { provider: String, message: String },

    #[error("engine: {0}")]
    Engine(String),

    /// Engine construction failed during a config switch. The switch is
    /// aborted and the previous context stays usable.
    #[error("context: {0}")]
    Context(String),

    /// Expected when a turn is interrupted or the connection drops.
    /// Never logged above debug level.
    #[error("cancelled")]
    Cancelled,

    #[error("config: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether this error is an expected cancellation rather than a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
