//! Shared, version-pinned wire protocol types.
//!
//! These types and constants are the single source of truth for everything
//! that crosses the cohort wire: the request/response envelopes, the status
//! taxonomy, and the encoding rules for value payloads and value references.

use base64::Engine as _;
use serde::{Deserialize, Serialize};

pub const COHORT_WIRE_SCHEMA_VERSION: &str = "cohort.wire@0.1.0";

/// Error classes shared by the registry, the backends, and the wire.
///
/// Classification matters: `FailedPrecondition` from a backend evicts that
/// backend from the registry, and `FailedPrecondition` from the registry
/// itself ("unknown executor") tells clients to re-acquire an executor id
/// and retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusCode {
    InvalidArgument,
    FailedPrecondition,
    NotFound,
    Internal,
    Unimplemented,
    Unavailable,
}

impl StatusCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusCode::InvalidArgument => "invalid_argument",
            StatusCode::FailedPrecondition => "failed_precondition",
            StatusCode::NotFound => "not_found",
            StatusCode::Internal => "internal",
            StatusCode::Unimplemented => "unimplemented",
            StatusCode::Unavailable => "unavailable",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    pub code: StatusCode,
    pub message: String,
}

impl Status {
    pub fn new(code: StatusCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(StatusCode::InvalidArgument, message)
    }

    pub fn failed_precondition(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FailedPrecondition, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NotFound, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::Internal, message)
    }

    pub fn unimplemented(message: impl Into<String>) -> Self {
        Self::new(StatusCode::Unimplemented, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::Unavailable, message)
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code.as_str(), self.message)
    }
}

impl std::error::Error for Status {}

/// One placement's participant count, as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cardinality {
    pub placement: String,
    pub count: u32,
}

/// The eight operations of the executor service.
///
/// Executor ids are opaque strings minted by `get_executor`; value refs are
/// decimal strings scoped to the executor named in the same request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum RequestOp {
    GetExecutor {
        cardinalities: Vec<Cardinality>,
    },
    CreateValue {
        executor_id: String,
        /// Base64-encoded value payload.
        value: String,
    },
    CreateCall {
        executor_id: String,
        function_ref: String,
        #[serde(default)]
        argument_ref: Option<String>,
    },
    CreateStruct {
        executor_id: String,
        element_refs: Vec<String>,
    },
    CreateSelection {
        executor_id: String,
        source_ref: String,
        index: u32,
    },
    Compute {
        executor_id: String,
        value_ref: String,
    },
    Dispose {
        executor_id: String,
        value_refs: Vec<String>,
    },
    DisposeExecutor {
        executor_id: String,
    },
}

impl RequestOp {
    /// Operation label used in diagnostics and error messages.
    pub fn label(&self) -> &'static str {
        match self {
            RequestOp::GetExecutor { .. } => "get_executor",
            RequestOp::CreateValue { .. } => "create_value",
            RequestOp::CreateCall { .. } => "create_call",
            RequestOp::CreateStruct { .. } => "create_struct",
            RequestOp::CreateSelection { .. } => "create_selection",
            RequestOp::Compute { .. } => "compute",
            RequestOp::Dispose { .. } => "dispose",
            RequestOp::DisposeExecutor { .. } => "dispose_executor",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub schema_version: String,
    #[serde(default)]
    pub seq: u64,
    #[serde(flatten)]
    pub op: RequestOp,
}

pub fn validate_request(req: &Request) -> Result<(), Status> {
    if req.schema_version != COHORT_WIRE_SCHEMA_VERSION {
        return Err(Status::invalid_argument(format!(
            "unsupported schema_version {:?}, expected {:?}",
            req.schema_version, COHORT_WIRE_SCHEMA_VERSION
        )));
    }
    Ok(())
}

/// Success payloads, one shape per operation family.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResponsePayload {
    Executor {
        executor_id: String,
    },
    ValueRef {
        value_ref: String,
    },
    Value {
        /// Base64-encoded materialized payload.
        value: String,
    },
    // Matches any remaining object; must stay the last variant.
    Empty {},
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseOutcome {
    Ok(ResponsePayload),
    Err(Status),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub schema_version: String,
    pub seq: u64,
    #[serde(flatten)]
    pub outcome: ResponseOutcome,
}

impl Response {
    pub fn ok(seq: u64, payload: ResponsePayload) -> Self {
        Self {
            schema_version: COHORT_WIRE_SCHEMA_VERSION.to_string(),
            seq,
            outcome: ResponseOutcome::Ok(payload),
        }
    }

    pub fn err(seq: u64, status: Status) -> Self {
        Self {
            schema_version: COHORT_WIRE_SCHEMA_VERSION.to_string(),
            seq,
            outcome: ResponseOutcome::Err(status),
        }
    }
}

pub fn encode_payload(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

pub fn decode_payload(s: &str) -> Result<Vec<u8>, Status> {
    base64::engine::general_purpose::STANDARD
        .decode(s)
        .map_err(|err| Status::invalid_argument(format!("value payload is not valid base64: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_round_trips_with_flattened_op() {
        let req = Request {
            schema_version: COHORT_WIRE_SCHEMA_VERSION.to_string(),
            seq: 7,
            op: RequestOp::CreateCall {
                executor_id: "clients=3/svc/0".to_string(),
                function_ref: "0".to_string(),
                argument_ref: None,
            },
        };
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"op\":\"create_call\""), "json={json}");
        let back: Request = serde_json::from_str(&json).unwrap();
        assert_eq!(back, req);
    }

    #[test]
    fn validate_request_rejects_unknown_schema() {
        let req = Request {
            schema_version: "cohort.wire@9.9.9".to_string(),
            seq: 0,
            op: RequestOp::DisposeExecutor {
                executor_id: "x".to_string(),
            },
        };
        let err = validate_request(&req).unwrap_err();
        assert_eq!(err.code, StatusCode::InvalidArgument);
    }

    #[test]
    fn response_outcomes_serialize_as_ok_or_err() {
        let ok = Response::ok(
            1,
            ResponsePayload::ValueRef {
                value_ref: "4".to_string(),
            },
        );
        let json = serde_json::to_string(&ok).unwrap();
        assert!(json.contains("\"ok\":{\"value_ref\":\"4\"}"), "json={json}");

        let err = Response::err(2, Status::failed_precondition("no executor"));
        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains("\"err\""), "json={json}");
        assert!(json.contains("\"failed_precondition\""), "json={json}");

        let back: Response = serde_json::from_str(&json).unwrap();
        match back.outcome {
            ResponseOutcome::Err(status) => {
                assert_eq!(status.code, StatusCode::FailedPrecondition)
            }
            other => panic!("expected err outcome, got {other:?}"),
        }
    }

    #[test]
    fn empty_payload_deserializes_from_empty_object() {
        let resp: Response =
            serde_json::from_str(&format!(
                "{{\"schema_version\":{COHORT_WIRE_SCHEMA_VERSION:?},\"seq\":3,\"ok\":{{}}}}"
            ))
            .unwrap();
        assert_eq!(resp.outcome, ResponseOutcome::Ok(ResponsePayload::Empty {}));
    }

    #[test]
    fn decode_payload_rejects_garbage() {
        let err = decode_payload("!!not-base64!!").unwrap_err();
        assert_eq!(err.code, StatusCode::InvalidArgument);
        assert_eq!(decode_payload("aGk=").unwrap(), b"hi");
    }
}
