// Copyright 2024 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::fmt;

use tonic::Status;

/// Raised when a balancer config (cluster-manager or pick-first) violates its JSON schema.
///
/// Mirrors the hand-rolled style of `storage::driver::error::StorageError`: a plain enum with a
/// manual `Display`/`std::error::Error` impl rather than a derive-macro error crate.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConfigParseError {
    Json(String),
    UnknownField { field: String },
}

impl fmt::Display for ConfigParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Json(msg) => write!(f, "invalid balancer config JSON: {msg}"),
            Self::UnknownField { field } => {
                write!(f, "invalid balancer config JSON: unknown field `{field}`")
            }
        }
    }
}

impl std::error::Error for ConfigParseError {}

impl From<serde_json::Error> for ConfigParseError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err.to_string())
    }
}

impl From<ConfigParseError> for Status {
    fn from(err: ConfigParseError) -> Self {
        Status::invalid_argument(err.to_string())
    }
}

/// Errors latched by a [`crate::handshaker::HandshakerStub`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HandshakerError {
    /// A second `send` arrived while a prior response sat unread in the one-slot buffer, or an
    /// unsolicited response arrived while the slot was already full.
    UnexpectedResponse,
    /// The stream ended via `on_error` or `on_completed` while a `send` was in flight (or a
    /// subsequent `send` observed the stub was already closed this way).
    StreamTerminated(String),
}

impl fmt::Display for HandshakerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnexpectedResponse => {
                write!(f, "unexpected handshaker response: response slot was full")
            }
            Self::StreamTerminated(msg) => write!(f, "handshaker stream terminated: {msg}"),
        }
    }
}

impl std::error::Error for HandshakerError {}

impl From<HandshakerError> for Status {
    fn from(err: HandshakerError) -> Self {
        match err {
            HandshakerError::UnexpectedResponse => Status::internal(err.to_string()),
            HandshakerError::StreamTerminated(_) => Status::unavailable(err.to_string()),
        }
    }
}

/// Errors produced while routing a pick through the cluster-dispatch picker.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PickError {
    /// No child picker is registered for the requested cluster name.
    ChildAbsent { cluster_name: String },
}

impl fmt::Display for PickError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ChildAbsent { cluster_name } => write!(
                f,
                "CDS encountered error: unable to find available subchannel for cluster {cluster_name}"
            ),
        }
    }
}

impl std::error::Error for PickError {}

impl From<PickError> for Status {
    fn from(err: PickError) -> Self {
        Status::unavailable(err.to_string())
    }
}
