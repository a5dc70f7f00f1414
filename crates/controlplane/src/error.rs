//! Control-plane error taxonomy.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ResourceKind;

/// Fieldless classification of an [`OpError`].
///
/// Retry policies are expressed as sets of kinds, so the orchestration layer
/// never has to look inside an error message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Transient,
    AlreadyExists,
    NotFound,
    Fatal,
    Timeout,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transient     => write!(f, "transient"),
            Self::AlreadyExists => write!(f, "already_exists"),
            Self::NotFound      => write!(f, "not_found"),
            Self::Fatal         => write!(f, "fatal"),
            Self::Timeout       => write!(f, "timeout"),
        }
    }
}

impl std::str::FromStr for ErrorKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "transient"      => Ok(Self::Transient),
            "already_exists" => Ok(Self::AlreadyExists),
            "not_found"      => Ok(Self::NotFound),
            "fatal"          => Ok(Self::Fatal),
            "timeout"        => Ok(Self::Timeout),
            other            => Err(format!("unknown error kind: {other}")),
        }
    }
}

/// Errors returned by a control-plane call.
///
/// The orchestration layer uses the variant to decide what happens next:
/// - `Transient`: retried with exponential back-off.
/// - `AlreadyExists`: recovered by adopting the existing resource.
/// - `NotFound` / `Fatal`: surfaced immediately.
/// - `Timeout`: synthesized once the retry budget is spent.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OpError {
    /// The call may succeed if repeated after a delay.
    #[error("transient control-plane error: {0}")]
    Transient(String),

    /// A resource with the requested name already exists.
    #[error("resource '{0}' already exists")]
    AlreadyExists(String),

    /// The requested resource (or a dependency) does not exist.
    #[error("resource '{0}' not found")]
    NotFound(String),

    /// Permanent rejection: bad input, permission denial, quota.
    #[error("fatal control-plane error: {0}")]
    Fatal(String),

    /// Only transient errors were observed until the retry budget ran out.
    #[error("operation '{operation}' timed out after {attempts} attempts in {elapsed:?}: {last_error}")]
    Timeout {
        operation: String,
        attempts: u32,
        elapsed: Duration,
        last_error: String,
    },
}

impl OpError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Transient(_)     => ErrorKind::Transient,
            Self::AlreadyExists(_) => ErrorKind::AlreadyExists,
            Self::NotFound(_)      => ErrorKind::NotFound,
            Self::Fatal(_)         => ErrorKind::Fatal,
            Self::Timeout { .. }   => ErrorKind::Timeout,
        }
    }

    /// Build an error of the given kind carrying `message`.
    ///
    /// `Timeout` is never produced by a remote call, so asking for it yields
    /// a zero-attempt timeout for `message`.
    pub fn of_kind(kind: ErrorKind, message: impl Into<String>) -> Self {
        let message = message.into();
        match kind {
            ErrorKind::Transient     => Self::Transient(message),
            ErrorKind::AlreadyExists => Self::AlreadyExists(message),
            ErrorKind::NotFound      => Self::NotFound(message),
            ErrorKind::Fatal         => Self::Fatal(message),
            ErrorKind::Timeout       => Self::Timeout {
                operation: message.clone(),
                attempts: 0,
                elapsed: Duration::ZERO,
                last_error: message,
            },
        }
    }

    /// Classify a structured service error code.
    ///
    /// Codes are matched exactly; the message is only carried along.
    pub fn from_service_code(code: &str, message: impl Into<String>) -> Self {
        let message = message.into();
        match code {
            "EntityAlreadyExists"
            | "ResourceConflictException"
            | "ResourceInUseException"
            | "InvalidGroup.Duplicate"
            | "InvalidKeyPair.Duplicate"
            | "InvalidLaunchTemplateName.AlreadyExistsException"
            | "AlreadyExists" => Self::AlreadyExists(message),

            "NoSuchEntity"
            | "ResourceNotFoundException"
            | "InvalidGroup.NotFound"
            | "InvalidKeyPair.NotFound"
            | "InvalidInstanceID.NotFound"
            | "InvalidLaunchTemplateName.NotFoundException" => Self::NotFound(message),

            "Throttling"
            | "ThrottlingException"
            | "TooManyRequestsException"
            | "RequestLimitExceeded"
            | "ServiceUnavailable"
            | "InternalFailure" => Self::Transient(message),

            _ => Self::Fatal(format!("{code}: {message}")),
        }
    }

    /// Like [`from_service_code`](Self::from_service_code), with the
    /// per-resource exceptions applied.
    ///
    /// The function service answers `InvalidParameterValueException` while
    /// the role it was handed is still propagating, so for functions that
    /// code is transient. Everywhere else it is bad input.
    pub fn from_service_code_for(
        resource: ResourceKind,
        code: &str,
        message: impl Into<String>,
    ) -> Self {
        match (resource, code) {
            (ResourceKind::Function, "InvalidParameterValueException") => {
                Self::Transient(message.into())
            }
            _ => Self::from_service_code(code, message),
        }
    }
}
