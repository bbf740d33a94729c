use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidArgument,
    MalformedFrame,
    UnexpectedEof,
    NoSuchMethod,
    IoClosed,
    AsynchronousInvocation,
    InvocationError,
    BindFailed,
    AcceptFailed,
    ConnectFailed,
    SendFailed,
    RecvFailed,
    #[serde(untagged)]
    Unknown(String),
}

/// Error type shared by the codec, the dispatcher and the channel layer.
///
/// Errors that cross the wire as marshalled throwables are serialized
/// directly, so the cause chain survives a round trip to the peer.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Error {
    pub kind: ErrorKind,
    pub msg: String,
    pub cause: Option<Box<Error>>,
}

impl Error {
    #[must_use]
    pub fn new(kind: ErrorKind, msg: String) -> Self {
        Self {
            kind,
            msg,
            cause: None,
        }
    }

    #[must_use]
    pub fn kind(kind: ErrorKind) -> Self {
        Self {
            kind,
            msg: String::default(),
            cause: None,
        }
    }

    #[must_use]
    pub fn with_cause(kind: ErrorKind, msg: String, cause: Error) -> Self {
        Self {
            kind,
            msg,
            cause: Some(Box::new(cause)),
        }
    }

}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause.as_ref().map(|e| e.as_ref() as _)
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Self::kind(kind)
    }
}

impl From<std::num::TryFromIntError> for Error {
    fn from(value: std::num::TryFromIntError) -> Self {
        Self::new(ErrorKind::InvalidArgument, value.to_string())
    }
}

impl From<rmp_serde::encode::Error> for Error {
    fn from(value: rmp_serde::encode::Error) -> Self {
        Self::new(ErrorKind::InvalidArgument, value.to_string())
    }
}

impl From<rmp_serde::decode::Error> for Error {
    fn from(value: rmp_serde::decode::Error) -> Self {
        Self::new(ErrorKind::MalformedFrame, value.to_string())
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.msg.is_empty() {
            write!(f, "{:?}", self.kind)?;
        } else {
            write!(f, "{:?}: {}", self.kind, self.msg)?;
        }
        if let Some(cause) = &self.cause {
            write!(f, ", caused by {cause}")?;
        }
        Ok(())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind() {
        let kind = ErrorKind::IoClosed;
        let error: Error = kind.into();
        assert_eq!(error.to_string(), "IoClosed");

        let error = Error::new(ErrorKind::BindFailed, "address in use".into());
        assert_eq!(error.to_string(), "BindFailed: address in use");
    }

    #[test]
    fn test_error_cause_chain() {
        let root = Error::new(ErrorKind::Unknown("ArithmeticError".into()), "x".into());
        let error = Error::with_cause(
            ErrorKind::AsynchronousInvocation,
            "fire failed".into(),
            root.clone(),
        );
        assert_eq!(error.cause.as_deref(), Some(&root));
        assert_eq!(
            error.to_string(),
            "AsynchronousInvocation: fire failed, caused by Unknown(\"ArithmeticError\"): x"
        );

        let source = std::error::Error::source(&error).unwrap();
        assert_eq!(source.to_string(), root.to_string());
    }

    #[test]
    fn test_error_round_trip() {
        let error = Error::with_cause(
            ErrorKind::Unknown("ArithmeticError".into()),
            "divide by zero".into(),
            Error::kind(ErrorKind::InvalidArgument),
        );
        let bytes = rmp_serde::to_vec(&error).unwrap();
        let decoded: Error = rmp_serde::from_slice(&bytes).unwrap();
        assert_eq!(decoded, error);
    }

    #[test]
    fn test_from_try_from_int_error() {
        let value: std::result::Result<u32, _> = (-1i64).try_into();
        let error: Error = value.unwrap_err().into();
        assert_eq!(error.kind, ErrorKind::InvalidArgument);
        assert!(!error.msg.is_empty());
    }

    #[test]
    fn test_from_rmp_serde_decode_error() {
        let invalid = vec![0xFF, 0xFF, 0xFF];
        let error: Error = rmp_serde::from_slice::<String>(&invalid).unwrap_err().into();
        assert_eq!(error.kind, ErrorKind::MalformedFrame);
    }
}
