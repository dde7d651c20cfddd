//! Error handling for plexrp.
//!
//! Provides a unified error type based on gRPC status codes, with mapping
//! from the underlying errors of the HTTP, websocket and IPC stacks to
//! appropriate categories.
//!
//! The bridge distinguishes a few of these categories at runtime:
//! * [`ErrorKind::FailedPrecondition`]: configuration errors, fatal before
//!   any I/O
//! * [`ErrorKind::Unimplemented`]: media kinds that have no presence
//!   mapping, swallowed by the caller
//! * everything else during authentication: transient, retried

#![allow(clippy::enum_glob_use)]

use std::fmt;
use thiserror::Error;

/// Main error type combining error kind and details.
#[derive(Debug)]
pub struct Error {
    /// Classification of the error
    pub kind: ErrorKind,

    /// Details of the underlying error
    pub error: Box<dyn std::error::Error + Send + Sync>,
}

/// Standard result type for plexrp operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error categories based on gRPC status codes.
///
/// Each variant maps to a specific HTTP status code and represents a
/// distinct failure category. See
/// [gRPC status codes](https://github.com/googleapis/googleapis/blob/master/google/rpc/code.proto)
/// for the original definitions.
#[expect(clippy::module_name_repetitions)]
#[derive(Clone, Copy, Debug, Eq, Error, Hash, Ord, PartialEq, PartialOrd)]
#[repr(u32)]
pub enum ErrorKind {
    /// HTTP Mapping: 499 Client Closed Request
    #[error("operation was cancelled")]
    Cancelled = 1,

    /// HTTP Mapping: 500 Internal Server Error
    #[error("unknown error")]
    Unknown = 2,

    /// HTTP Mapping: 400 Bad Request
    #[error("invalid argument specified")]
    InvalidArgument = 3,

    /// HTTP Mapping: 504 Gateway Timeout
    #[error("operation timed out")]
    DeadlineExceeded = 4,

    /// HTTP Mapping: 404 Not Found
    #[error("not found")]
    NotFound = 5,

    /// HTTP Mapping: 409 Conflict
    #[error("attempt to create what already exists")]
    AlreadyExists = 6,

    /// HTTP Mapping: 403 Forbidden
    #[error("permission denied")]
    PermissionDenied = 7,

    /// HTTP Mapping: 401 Unauthorized
    #[error("no valid authentication credentials")]
    Unauthenticated = 16,

    /// HTTP Mapping: 429 Too Many Requests
    #[error("resource has been exhausted")]
    ResourceExhausted = 8,

    /// HTTP Mapping: 400 Bad Request
    #[error("invalid state")]
    FailedPrecondition = 9,

    /// HTTP Mapping: 409 Conflict
    #[error("operation aborted")]
    Aborted = 10,

    /// HTTP Mapping: 400 Bad Request
    #[error("out of range")]
    OutOfRange = 11,

    /// HTTP Mapping: 501 Not Implemented
    #[error("not implemented")]
    Unimplemented = 12,

    /// HTTP Mapping: 500 Internal Server Error
    #[error("internal error")]
    Internal = 13,

    /// HTTP Mapping: 503 Service Unavailable
    #[error("service unavailable")]
    Unavailable = 14,

    /// HTTP Mapping: 500 Internal Server Error
    #[error("unrecoverable data loss or corruption")]
    DataLoss = 15,
}

macro_rules! constructor {
    ($name:ident, $kind:ident, $doc:literal) => {
        #[doc = $doc]
        pub fn $name<E>(error: E) -> Self
        where
            E: Into<Box<dyn std::error::Error + Send + Sync>>,
        {
            Self {
                kind: ErrorKind::$kind,
                error: error.into(),
            }
        }
    };
}

impl Error {
    /// Creates a new error with specified kind and details.
    pub fn new<E>(kind: ErrorKind, error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self {
            kind,
            error: error.into(),
        }
    }

    /// Attempts to downcast the underlying error to a concrete type.
    #[must_use]
    pub fn downcast<E>(&self) -> Option<&E>
    where
        E: std::error::Error + 'static,
    {
        self.error.downcast_ref::<E>()
    }

    constructor!(aborted, Aborted, "Operation interrupted mid-execution.");
    constructor!(cancelled, Cancelled, "Operation cancelled before completion.");
    constructor!(data_loss, DataLoss, "Unrecoverable data corruption or loss.");
    constructor!(
        deadline_exceeded,
        DeadlineExceeded,
        "Time-bound operation exceeded its limit."
    );
    constructor!(
        failed_precondition,
        FailedPrecondition,
        "Operation cannot proceed in the current state. Also used for \
         configuration errors raised before any I/O."
    );
    constructor!(internal, Internal, "Unexpected internal error.");
    constructor!(
        invalid_argument,
        InvalidArgument,
        "Provided value failed validation."
    );
    constructor!(not_found, NotFound, "Requested resource does not exist.");
    constructor!(out_of_range, OutOfRange, "Value exceeds its allowed bounds.");
    constructor!(
        permission_denied,
        PermissionDenied,
        "Caller lacks the necessary permissions."
    );
    constructor!(
        resource_exhausted,
        ResourceExhausted,
        "A resource limit has been reached."
    );
    constructor!(
        unauthenticated,
        Unauthenticated,
        "Credentials are missing, invalid or expired."
    );
    constructor!(unavailable, Unavailable, "Service temporarily unavailable.");
    constructor!(
        unimplemented,
        Unimplemented,
        "Requested operation has no implementation. Used for media kinds \
         that cannot be shown as presence."
    );
    constructor!(unknown, Unknown, "Error that fits no other category.");
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.error.source()
    }
}

/// Formats the error for display as "{kind}: {details}".
impl fmt::Display for Error {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "{}: ", self.kind)?;
        self.error.fmt(fmt)
    }
}

/// Converts IO errors into appropriate error kinds.
impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind::*;
        match err.kind() {
            NotFound => Self::not_found(err),
            PermissionDenied => Self::permission_denied(err),
            AddrInUse | AlreadyExists => Self::new(ErrorKind::AlreadyExists, err),
            AddrNotAvailable | ConnectionRefused | NotConnected => Self::unavailable(err),
            BrokenPipe | ConnectionReset | ConnectionAborted => Self::aborted(err),
            Interrupted | WouldBlock => Self::cancelled(err),
            UnexpectedEof => Self::data_loss(err),
            TimedOut => Self::deadline_exceeded(err),
            InvalidInput | InvalidData => Self::invalid_argument(err),
            WriteZero => Self::resource_exhausted(err),
            _ => Self::unknown(err),
        }
    }
}

/// Converts HTTP client errors into appropriate error kinds.
impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_body() {
            return Self::data_loss(err);
        }

        if err.is_decode() {
            return Self::invalid_argument(err);
        }

        if err.is_builder() {
            return Self::internal(err);
        }

        if err.is_connect() || err.is_redirect() {
            return Self::unavailable(err);
        }

        if err.is_status() {
            let kind = match err.status() {
                Some(reqwest::StatusCode::UNAUTHORIZED) => ErrorKind::Unauthenticated,
                Some(reqwest::StatusCode::FORBIDDEN) => ErrorKind::PermissionDenied,
                Some(reqwest::StatusCode::NOT_FOUND) => ErrorKind::NotFound,
                Some(reqwest::StatusCode::TOO_MANY_REQUESTS) => ErrorKind::ResourceExhausted,
                _ => ErrorKind::FailedPrecondition,
            };
            return Self::new(kind, err);
        }

        if err.is_timeout() {
            return Self::deadline_exceeded(err);
        }

        Self::unknown(err)
    }
}

/// Converts WebSocket errors into appropriate error kinds.
impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error::*;
        match err {
            ConnectionClosed => Self::cancelled(err),
            AlreadyClosed => Self::unavailable(err),
            Io(err) => Self::data_loss(err),
            Capacity(err) => Self::out_of_range(err),
            Utf8 => Self::invalid_argument(err),
            WriteBufferFull(err) => Self::resource_exhausted(err.to_string()),
            AttackAttempt => Self::permission_denied(err),
            _ => Self::unknown(err),
        }
    }
}

/// Converts JSON errors through IO error mapping.
impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        std::io::Error::from(err).into()
    }
}

/// Converts TOML parsing errors to `InvalidArgument`.
impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Self::invalid_argument(e)
    }
}

/// Converts Discord IPC errors to `Unavailable`.
///
/// Every failure of the presence sink is treated the same way by the
/// supervisor, so no finer mapping is needed.
impl From<discord_sdk::Error> for Error {
    fn from(e: discord_sdk::Error) -> Self {
        Self::unavailable(e)
    }
}

/// Converts header size errors to `OutOfRange`.
impl From<http::header::MaxSizeReached> for Error {
    fn from(e: http::header::MaxSizeReached) -> Self {
        Self::out_of_range(e.to_string())
    }
}

/// Converts invalid header errors to `Internal`.
impl From<http::header::InvalidHeaderValue> for Error {
    fn from(e: http::header::InvalidHeaderValue) -> Self {
        Self::internal(e.to_string())
    }
}

/// Converts URL parsing errors to `Internal`.
impl From<url::ParseError> for Error {
    fn from(e: url::ParseError) -> Self {
        Self::internal(e.to_string())
    }
}

/// Converts integer parsing errors to `InvalidArgument`.
impl From<std::num::ParseIntError> for Error {
    fn from(e: std::num::ParseIntError) -> Self {
        Self::invalid_argument(e.to_string())
    }
}

/// Converts timeout errors to `DeadlineExceeded`.
impl From<tokio::time::error::Elapsed> for Error {
    fn from(e: tokio::time::error::Elapsed) -> Self {
        Self::deadline_exceeded(e.to_string())
    }
}

/// Converts UUID errors to `InvalidArgument`.
impl From<uuid::Error> for Error {
    fn from(e: uuid::Error) -> Self {
        Self::invalid_argument(e.to_string())
    }
}
