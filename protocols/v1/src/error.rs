use crate::{
    json_rpc::{Response, RpcError},
    methods::MethodError,
};
use serde_json::Value;
use std::fmt;

/// Stratum error codes shared by the Bitcoin-family miner population.
pub mod codes {
    pub const OTHER: i32 = 20;
    pub const JOB_NOT_FOUND: i32 = 21;
    pub const DUPLICATE_SHARE: i32 = 22;
    pub const LOW_DIFFICULTY_SHARE: i32 = 23;
    pub const UNAUTHORIZED_WORKER: i32 = 24;
    pub const NOT_SUBSCRIBED: i32 = 25;
    /// Protocol-level failure outside the mining code table.
    pub const MINUS_ONE: i32 = -1;
}

/// An error reportable to a Stratum client as `[code, message, null]`.
#[derive(Debug, Clone, PartialEq)]
pub struct StratumError {
    pub code: i32,
    pub message: String,
}

impl StratumError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::new(codes::OTHER, message)
    }

    pub fn minus_one(message: impl Into<String>) -> Self {
        Self::new(codes::MINUS_ONE, message)
    }

    pub fn missing_request_id() -> Self {
        Self::minus_one("missing request id")
    }

    pub fn unsupported_request() -> Self {
        Self::other("Unsupported request")
    }

    pub fn job_not_found() -> Self {
        Self::new(codes::JOB_NOT_FOUND, "Job not found")
    }

    pub fn duplicate_share() -> Self {
        Self::new(codes::DUPLICATE_SHARE, "Duplicate share")
    }

    pub fn low_difficulty_share() -> Self {
        Self::new(codes::LOW_DIFFICULTY_SHARE, "Low difficulty share")
    }

    pub fn unauthorized_worker() -> Self {
        Self::new(codes::UNAUTHORIZED_WORKER, "Unauthorized worker")
    }

    pub fn not_subscribed() -> Self {
        Self::new(codes::NOT_SUBSCRIBED, "Not subscribed")
    }

    /// Encodes this error as the response to the request with the given id.
    pub fn into_response(self, id: Value) -> Response {
        Response {
            id,
            result: Value::Null,
            error: Some(self.into()),
        }
    }
}

impl From<StratumError> for RpcError {
    fn from(e: StratumError) -> Self {
        RpcError(e.code, e.message, None)
    }
}

impl fmt::Display for StratumError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stratum error {}: {}", self.code, self.message)
    }
}

impl std::error::Error for StratumError {}

/// Errors raised while interpreting inbound frames, before any method
/// handler runs.
#[derive(Debug)]
#[non_exhaustive]
pub enum Error {
    Method(MethodError),
    /// A server should never receive a json-rpc response from a miner.
    InvalidJsonRpcMessageKind,
}

impl From<MethodError> for Error {
    fn from(inner: MethodError) -> Self {
        Error::Method(inner)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Method(e) => write!(f, "method error: {e:?}"),
            Error::InvalidJsonRpcMessageKind => {
                write!(f, "received a json-rpc message kind a server cannot handle")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn code_table_matches_wire_values() {
        assert_eq!(StratumError::unauthorized_worker().code, 24);
        assert_eq!(StratumError::not_subscribed().code, 25);
        assert_eq!(StratumError::job_not_found().code, 21);
        assert_eq!(StratumError::duplicate_share().code, 22);
        assert_eq!(StratumError::low_difficulty_share().code, 23);
        assert_eq!(StratumError::other("x").code, 20);
        assert_eq!(StratumError::missing_request_id().code, -1);
    }

    #[test]
    fn into_response_carries_id_and_null_result() {
        let res = StratumError::not_subscribed().into_response(json!(3));
        assert_eq!(res.id, json!(3));
        assert!(res.result.is_null());
        assert_eq!(res.error.unwrap().0, 25);
    }
}
