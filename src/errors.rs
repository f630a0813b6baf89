use thiserror::Error;

/// Failure of a page fetch or of a whole load run.
///
/// Cloneable so one failed run can be reported to every caller that joined it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError {
    #[error("backend unreachable: {0}")]
    Network(String),
    #[error("backend returned {status}: {body}")]
    Server { status: u16, body: String },
    #[error("malformed page payload: {0}")]
    Parse(String),
    #[error("load cancelled")]
    Cancelled,
}

impl LoadError {
    pub fn parse(reason: impl Into<String>) -> Self {
        LoadError::Parse(reason.into())
    }

    /// Whether retrying the same request could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            LoadError::Network(_) => true,
            LoadError::Server { status, .. } => *status >= 500,
            LoadError::Parse(_) | LoadError::Cancelled => false,
        }
    }
}

impl From<serde_json::Error> for LoadError {
    fn from(err: serde_json::Error) -> Self {
        LoadError::Parse(err.to_string())
    }
}
