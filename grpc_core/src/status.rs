// Copyright 2024 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::fmt;

/// The canonical gRPC status codes, with a `Display` impl that produces the upper-snake-case
/// name used as the `grpc.status` metric attribute (e.g. `OK`, `UNAVAILABLE`).
///
/// The mapping goes through `tonic::Code` rather than a raw numeric `grpc-status` trailer, since
/// the metrics subsystem observes attempts via direct method calls rather than sniffing trailers.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum GrpcStatusCode {
    Ok,
    Cancelled,
    Unknown,
    InvalidArgument,
    DeadlineExceeded,
    NotFound,
    AlreadyExists,
    PermissionDenied,
    ResourceExhausted,
    FailedPrecondition,
    Aborted,
    OutOfRange,
    Unimplemented,
    Internal,
    Unavailable,
    DataLoss,
    Unauthenticated,
}

impl GrpcStatusCode {
    /// The canonical upper-snake-case name used for the `grpc.status` attribute.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::Cancelled => "CANCELLED",
            Self::Unknown => "UNKNOWN",
            Self::InvalidArgument => "INVALID_ARGUMENT",
            Self::DeadlineExceeded => "DEADLINE_EXCEEDED",
            Self::NotFound => "NOT_FOUND",
            Self::AlreadyExists => "ALREADY_EXISTS",
            Self::PermissionDenied => "PERMISSION_DENIED",
            Self::ResourceExhausted => "RESOURCE_EXHAUSTED",
            Self::FailedPrecondition => "FAILED_PRECONDITION",
            Self::Aborted => "ABORTED",
            Self::OutOfRange => "OUT_OF_RANGE",
            Self::Unimplemented => "UNIMPLEMENTED",
            Self::Internal => "INTERNAL",
            Self::Unavailable => "UNAVAILABLE",
            Self::DataLoss => "DATA_LOSS",
            Self::Unauthenticated => "UNAUTHENTICATED",
        }
    }
}

impl fmt::Display for GrpcStatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<tonic::Code> for GrpcStatusCode {
    fn from(code: tonic::Code) -> Self {
        match code {
            tonic::Code::Ok => Self::Ok,
            tonic::Code::Cancelled => Self::Cancelled,
            tonic::Code::InvalidArgument => Self::InvalidArgument,
            tonic::Code::DeadlineExceeded => Self::DeadlineExceeded,
            tonic::Code::NotFound => Self::NotFound,
            tonic::Code::AlreadyExists => Self::AlreadyExists,
            tonic::Code::PermissionDenied => Self::PermissionDenied,
            tonic::Code::ResourceExhausted => Self::ResourceExhausted,
            tonic::Code::FailedPrecondition => Self::FailedPrecondition,
            tonic::Code::Aborted => Self::Aborted,
            tonic::Code::OutOfRange => Self::OutOfRange,
            tonic::Code::Unimplemented => Self::Unimplemented,
            tonic::Code::Internal => Self::Internal,
            tonic::Code::Unavailable => Self::Unavailable,
            tonic::Code::DataLoss => Self::DataLoss,
            tonic::Code::Unauthenticated => Self::Unauthenticated,
            tonic::Code::Unknown => Self::Unknown,
        }
    }
}

impl From<&tonic::Status> for GrpcStatusCode {
    fn from(status: &tonic::Status) -> Self {
        status.code().into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_canonical_names() {
        assert_eq!(GrpcStatusCode::Ok.to_string(), "OK");
        assert_eq!(GrpcStatusCode::Unavailable.to_string(), "UNAVAILABLE");
        assert_eq!(GrpcStatusCode::NotFound.to_string(), "NOT_FOUND");
        assert_eq!(
            GrpcStatusCode::DeadlineExceeded.to_string(),
            "DEADLINE_EXCEEDED"
        );
    }

    #[test]
    fn converts_from_tonic_code() {
        assert_eq!(
            GrpcStatusCode::from(tonic::Code::Unavailable),
            GrpcStatusCode::Unavailable
        );
        assert_eq!(
            GrpcStatusCode::from(&tonic::Status::cancelled("boom")),
            GrpcStatusCode::Cancelled
        );
    }
}
