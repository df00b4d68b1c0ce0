use thiserror::Error;

#[derive(Debug, Error)]
pub enum MigrateError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("destination project '{0}' not found")]
    ProjectNotFound(String),

    #[error("milestone '{0}' has no destination counterpart")]
    MilestoneNotFound(String),

    #[error("destination user '{0}' not found")]
    UserNotFound(String),

    #[error("source rpc fault in {method}: {message}")]
    Rpc { method: String, message: String },

    #[error("http error: {0}")]
    Http(#[from] Box<ureq::Error>),

    #[error("unexpected response from {0}: {1}")]
    UnexpectedResponse(String, String),

    #[error("locked by another process: {0}")]
    Locked(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("git error: {0}")]
    Git(#[from] git2::Error),
}

impl From<ureq::Error> for MigrateError {
    fn from(err: ureq::Error) -> Self {
        Self::Http(Box::new(err))
    }
}

impl MigrateError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Config(_) => "config_error",
            Self::ProjectNotFound(_) => "project_not_found",
            Self::MilestoneNotFound(_) => "milestone_not_found",
            Self::UserNotFound(_) => "user_not_found",
            Self::Rpc { .. } => "rpc_fault",
            Self::Http(_) => "http_error",
            Self::UnexpectedResponse(_, _) => "unexpected_response",
            Self::Locked(_) => "locked",
            Self::Io(_) => "io_error",
            Self::Json(_) => "json_error",
            Self::Yaml(_) => "yaml_error",
            Self::Db(_) => "db_error",
            Self::Git(_) => "git_error",
        }
    }
}

pub type Result<T> = std::result::Result<T, MigrateError>;
