// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Common error types used throughout the kernel

use core::fmt;

use crate::rustux::types::err::*;
use crate::rustux::types::Status;

/// Result type for operations that can fail
pub type Result<T = ()> = core::result::Result<T, Error>;

/// Recoverable error codes
///
/// Anything a caller can cause is reported through one of these. Broken
/// kernel invariants are fatal and never show up here.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    InvalidArgs = RX_ERR_INVALID_ARGS,
    BadHandle = RX_ERR_BAD_HANDLE,
    BadState = RX_ERR_BAD_STATE,
    NotSupported = RX_ERR_NOT_SUPPORTED,
    NoMemory = RX_ERR_NO_MEMORY,
    TimedOut = RX_ERR_TIMED_OUT,
    NotFound = RX_ERR_NOT_FOUND,
    AlreadyExists = RX_ERR_ALREADY_EXISTS,
    AccessDenied = RX_ERR_ACCESS_DENIED,
    Internal = RX_ERR_INTERNAL,
    NoResources = RX_ERR_NO_RESOURCES,
    OutOfRange = RX_ERR_OUT_OF_RANGE,
    WrongType = RX_ERR_WRONG_TYPE,
    PeerClosed = RX_ERR_PEER_CLOSED,
    Interrupted = RX_ERR_INTERRUPTED,
}

impl Error {
    /// Convert error to status code
    pub fn to_status(self) -> Status {
        self as Status
    }

    /// Convert status code to error
    ///
    /// Unknown codes collapse to [`Error::Internal`].
    pub fn from_status(status: Status) -> Self {
        match status {
            RX_ERR_INVALID_ARGS => Error::InvalidArgs,
            RX_ERR_BAD_HANDLE => Error::BadHandle,
            RX_ERR_BAD_STATE => Error::BadState,
            RX_ERR_NOT_SUPPORTED => Error::NotSupported,
            RX_ERR_NO_MEMORY => Error::NoMemory,
            RX_ERR_TIMED_OUT => Error::TimedOut,
            RX_ERR_NOT_FOUND => Error::NotFound,
            RX_ERR_ALREADY_EXISTS => Error::AlreadyExists,
            RX_ERR_ACCESS_DENIED => Error::AccessDenied,
            RX_ERR_NO_RESOURCES => Error::NoResources,
            RX_ERR_OUT_OF_RANGE => Error::OutOfRange,
            RX_ERR_WRONG_TYPE => Error::WrongType,
            RX_ERR_PEER_CLOSED => Error::PeerClosed,
            RX_ERR_INTERRUPTED => Error::Interrupted,
            _ => Error::Internal,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Error::InvalidArgs => "RX_ERR_INVALID_ARGS",
            Error::BadHandle => "RX_ERR_BAD_HANDLE",
            Error::BadState => "RX_ERR_BAD_STATE",
            Error::NotSupported => "RX_ERR_NOT_SUPPORTED",
            Error::NoMemory => "RX_ERR_NO_MEMORY",
            Error::TimedOut => "RX_ERR_TIMED_OUT",
            Error::NotFound => "RX_ERR_NOT_FOUND",
            Error::AlreadyExists => "RX_ERR_ALREADY_EXISTS",
            Error::AccessDenied => "RX_ERR_ACCESS_DENIED",
            Error::Internal => "RX_ERR_INTERNAL",
            Error::NoResources => "RX_ERR_NO_RESOURCES",
            Error::OutOfRange => "RX_ERR_OUT_OF_RANGE",
            Error::WrongType => "RX_ERR_WRONG_TYPE",
            Error::PeerClosed => "RX_ERR_PEER_CLOSED",
            Error::Interrupted => "RX_ERR_INTERRUPTED",
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.to_status())
    }
}

impl From<Error> for Status {
    fn from(err: Error) -> Self {
        err.to_status()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for err in [Error::TimedOut, Error::PeerClosed, Error::OutOfRange, Error::WrongType] {
            assert_eq!(Error::from_status(err.to_status()), err);
        }
    }

    #[test]
    fn test_unknown_status_is_internal() {
        assert_eq!(Error::from_status(-999), Error::Internal);
        assert_eq!(Error::from_status(0), Error::Internal);
    }
}
