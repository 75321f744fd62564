// Copyright (c) 2025 BorealDB Contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Error and status types shared by the core and both wire codecs.
//!
//! Every dispatch path returns [`Result`]; the status code taxonomy is a
//! fixed wire contract, identical across the Thrift and Protobuf encodings.

/// Status codes carried by every [`Error`].
///
/// The numeric values are a stable wire contract and must never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum StatusCode {
    Ok = 0,
    Unknown = 1,
    NotImplemented = 2,
    NotFound = 3,
    AlreadyExists = 4,
    InvalidArgument = 5,
    InvalidState = 6,
    InvalidData = 7,
    Io = 8,
    Cancelled = 9,
    Unauthenticated = 10,
    Unauthorized = 11,
}

impl StatusCode {
    /// Decode a wire status code, mapping unknown values to `Unknown`.
    pub fn from_i32(code: i32) -> Self {
        match code {
            0 => StatusCode::Ok,
            1 => StatusCode::Unknown,
            2 => StatusCode::NotImplemented,
            3 => StatusCode::NotFound,
            4 => StatusCode::AlreadyExists,
            5 => StatusCode::InvalidArgument,
            6 => StatusCode::InvalidState,
            7 => StatusCode::InvalidData,
            8 => StatusCode::Io,
            9 => StatusCode::Cancelled,
            10 => StatusCode::Unauthenticated,
            11 => StatusCode::Unauthorized,
            _ => StatusCode::Unknown,
        }
    }
}

/// The one error type that crosses the dispatch boundary.
///
/// `vendor_code` and `sqlstate` are passed through from the remote error
/// envelope when the warehouse provides them; both are absent for errors the
/// core raises itself.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{message}")]
pub struct Error {
    pub message: String,
    pub status: StatusCode,
    pub vendor_code: Option<i32>,
    pub sqlstate: Option<String>,
    pub details: Vec<(String, String)>,
}

impl Error {
    fn with_status(status: StatusCode) -> Self {
        Error {
            message: String::new(),
            status,
            vendor_code: None,
            sqlstate: None,
            details: Vec::new(),
        }
    }

    pub fn unknown() -> Self {
        Self::with_status(StatusCode::Unknown)
    }

    pub fn not_implemented() -> Self {
        Self::with_status(StatusCode::NotImplemented)
    }

    pub fn not_found() -> Self {
        Self::with_status(StatusCode::NotFound)
    }

    pub fn already_exists() -> Self {
        Self::with_status(StatusCode::AlreadyExists)
    }

    pub fn invalid_argument() -> Self {
        Self::with_status(StatusCode::InvalidArgument)
    }

    pub fn invalid_state() -> Self {
        Self::with_status(StatusCode::InvalidState)
    }

    pub fn invalid_data() -> Self {
        Self::with_status(StatusCode::InvalidData)
    }

    pub fn io() -> Self {
        Self::with_status(StatusCode::Io)
    }

    pub fn unauthenticated() -> Self {
        Self::with_status(StatusCode::Unauthenticated)
    }

    pub fn unauthorized() -> Self {
        Self::with_status(StatusCode::Unauthorized)
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn vendor_code(mut self, code: i32) -> Self {
        self.vendor_code = Some(code);
        self
    }

    pub fn sqlstate(mut self, sqlstate: impl Into<String>) -> Self {
        self.sqlstate = Some(sqlstate.into());
        self
    }

    pub fn detail(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.details.push((key.into(), value.into()));
        self
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_code_round_trip() {
        for code in [
            StatusCode::Ok,
            StatusCode::Unknown,
            StatusCode::NotImplemented,
            StatusCode::NotFound,
            StatusCode::AlreadyExists,
            StatusCode::InvalidArgument,
            StatusCode::InvalidState,
            StatusCode::InvalidData,
            StatusCode::Io,
            StatusCode::Cancelled,
            StatusCode::Unauthenticated,
            StatusCode::Unauthorized,
        ] {
            assert_eq!(StatusCode::from_i32(code as i32), code);
        }
        assert_eq!(StatusCode::from_i32(99), StatusCode::Unknown);
    }

    #[test]
    fn test_error_builder() {
        let err = Error::io()
            .message("connection reset")
            .vendor_code(390111)
            .sqlstate("08S01")
            .detail("host", "warehouse-1");
        assert_eq!(err.status, StatusCode::Io);
        assert_eq!(err.to_string(), "connection reset");
        assert_eq!(err.vendor_code, Some(390111));
        assert_eq!(err.sqlstate.as_deref(), Some("08S01"));
        assert_eq!(err.details.len(), 1);
    }
}
