use thiserror::Error;

/// Startup failures: the process must not start when any of these occur.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required setting: {0}")]
    Missing(String),

    #[error("invalid value for {key}: {reason}")]
    Invalid { key: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("rules file parse error: {0}")]
    Parse(#[from] toml::de::Error),
}
