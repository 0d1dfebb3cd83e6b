use thiserror::Error;

#[derive(Error, Debug)]
pub enum OrganelleError {
    #[error("Unknown task '{0}'")]
    UnknownTask(String),

    #[error("{species}: cannot switch to undeclared state '{state}'")]
    UndeclaredState { species: String, state: String },

    #[error("Malformed content: {0}")]
    MalformedContent(String),

    #[error("Nested rules exceeded {limit} evaluations in one pass")]
    NestedRuleLimit { limit: usize },

    #[error("Unknown species: {0}")]
    UnknownSpecies(String),

    #[error("Property '{0}' is calculated and cannot be set")]
    ReadOnlyProperty(String),

    #[error("Unknown entity '{0}' (expected 'world' or 'agent')")]
    UnknownEntity(String),

    #[error("No {0} in scope for this statement")]
    MissingEntity(&'static str),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl OrganelleError {
    pub(crate) fn malformed(message: impl Into<String>) -> Self {
        OrganelleError::MalformedContent(message.into())
    }
}

pub type Result<T> = std::result::Result<T, OrganelleError>;
