use thiserror::Error;

/// Classification of a failure to ingest inbound trace context.
///
/// Every variant is reported through its own supportability counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
pub enum IngestErrorType {
    /// The proprietary header was present but empty.
    NullPayload,
    ParseException,
    MajorVersionUnsupported,
    /// The payload carried neither a span id nor a transaction id.
    NotTraceable,
    UntrustedAccount,
    TraceParentParseException,
    TracestateParseException,
    TracestateInvalidNrEntry,
    TracestateNoNrEntry,
    Other,
}

/// Failure to decode an inbound proprietary payload.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IngestError {
    #[error("trace payload is empty")]
    NullPayload,
    #[error("cannot parse trace payload: {0}")]
    Parse(String),
    #[error("unsupported trace payload major version {0}")]
    MajorVersion(u16),
    /// Any other failure from a custom [`HeaderEncoder`](super::payload::HeaderEncoder).
    #[error("cannot ingest trace payload: {0}")]
    Other(String),
}

impl IngestError {
    #[must_use]
    pub fn kind(&self) -> IngestErrorType {
        match self {
            IngestError::NullPayload => IngestErrorType::NullPayload,
            IngestError::Parse(_) => IngestErrorType::ParseException,
            IngestError::MajorVersion(_) => IngestErrorType::MajorVersionUnsupported,
            IngestError::Other(_) => IngestErrorType::Other,
        }
    }
}

impl From<serde_json::Error> for IngestError {
    fn from(err: serde_json::Error) -> Self {
        IngestError::Parse(err.to_string())
    }
}

impl From<base64::DecodeError> for IngestError {
    fn from(err: base64::DecodeError) -> Self {
        IngestError::Parse(err.to_string())
    }
}

impl From<std::string::FromUtf8Error> for IngestError {
    fn from(err: std::string::FromUtf8Error) -> Self {
        IngestError::Parse(err.to_string())
    }
}

/// Structural failure while reading one W3C header.
#[derive(Error, Debug, Copy, Clone, PartialEq, Eq)]
#[error("Cannot parse {header}: {message}")]
pub struct HeaderError {
    message: &'static str,
    // which header was being read
    header: &'static str,
}

impl HeaderError {
    #[must_use]
    pub fn traceparent(message: &'static str) -> Self {
        Self {
            message,
            header: "traceparent",
        }
    }

    #[must_use]
    pub fn tracestate(message: &'static str) -> Self {
        Self {
            message,
            header: "tracestate",
        }
    }
}

/// Failure to serialize an outbound payload for the wire.
#[derive(Error, Debug)]
#[error("Cannot encode trace payload: {0}")]
pub struct EncodeError(#[from] serde_json::Error);
