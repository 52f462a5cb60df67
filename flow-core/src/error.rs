use thiserror::Error;

pub type FlowResult<T> = Result<T, FlowError>;

#[derive(Error, Debug, Clone)]
pub enum FlowError {
    #[error("Configuration problem: `{0}`")]
    Config(String),
    #[error("Key or path `{key:?}` was not found.  Reason: `{error:?}`")]
    NotExist { key: String, error: String },
    #[error("Template parse error at line {line}: {message}")]
    Parse { line: usize, message: String },
    #[error("Malformed document: {message}")]
    Document { message: String },
    #[error("Mapping rule error: `{0}`")]
    Rule(String),
    #[error("Connector failed due to `{message}` caused by: `{caused_by:?}`")]
    Connector {
        message: String,
        //can't keep the source error because of clone
        caused_by: String,
    },
    /// position is 1 based and relative to the whole create operation
    #[error("#{position} : {message}")]
    Create { position: u64, message: String },
    #[error("Connection/Transport problem due to: `{0}`")]
    FatalIO(String),
    #[error("Payload does not belong to this stream")]
    StreamMismatch,
    #[error("Unsupported operation: `{0}`")]
    Unsupported(String),
    #[error("SendError from `{from:?}` to `{to:?}` reason: `{reason:?}`")]
    SendError {
        from: String,
        to: String,
        reason: String,
    },
    #[error("JoinError: `{0}`")]
    JoinError(String),
    #[error("Error: `{0}`")]
    Generic(String),
}

impl FlowError {
    pub fn send_error<A: Into<String>, B: Into<String>, C: std::fmt::Display>(
        from: A,
        to: B,
        reason: C,
    ) -> Self {
        FlowError::SendError {
            from: from.into(),
            to: to.into(),
            reason: reason.to_string(),
        }
    }

    pub fn connector<M, E>(m: M, e: E) -> Self
    where
        M: ToString,
        E: std::fmt::Display,
    {
        FlowError::Connector {
            message: m.to_string(),
            caused_by: e.to_string(),
        }
    }

    pub fn not_exist<K: ToString, E: ToString>(key: K, error: E) -> Self {
        FlowError::NotExist {
            key: key.to_string(),
            error: error.to_string(),
        }
    }

    pub fn document<M: ToString>(m: M) -> Self {
        FlowError::Document {
            message: m.to_string(),
        }
    }

    pub fn config<M: ToString>(m: M) -> Self {
        FlowError::Config(m.to_string())
    }
}

use tokio::task::JoinError;
impl From<JoinError> for FlowError {
    fn from(er: JoinError) -> Self {
        FlowError::JoinError(er.to_string())
    }
}

impl From<std::io::Error> for FlowError {
    fn from(er: std::io::Error) -> Self {
        FlowError::FatalIO(er.to_string())
    }
}

impl From<anyhow::Error> for FlowError {
    fn from(er: anyhow::Error) -> Self {
        FlowError::Generic(er.to_string())
    }
}

impl From<&str> for FlowError {
    fn from(er: &str) -> Self {
        FlowError::Generic(er.to_string())
    }
}

impl From<serde_json::Error> for FlowError {
    fn from(er: serde_json::Error) -> Self {
        FlowError::Document {
            message: er.to_string(),
        }
    }
}
