use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::errors::ErrorCode;

/// Operation-specific result fields, flattened into the envelope.
pub type Payload = Map<String, Value>;

// -----------------------------------------------------------------------------
// ----- ResultEnvelope --------------------------------------------------------

/// The one response every invocation produces, success or not.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultEnvelope {
    pub success: bool,

    #[serde(flatten)]
    pub payload: Payload,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,

    pub execution_time_seconds: f64,
    pub operation_name: String,
    pub timestamp: String,
}

impl ResultEnvelope {
    pub(crate) fn success(operation: &str, payload: Payload, elapsed: Duration) -> Self {
        Self {
            success: true,
            payload,
            error: None,
            error_code: None,
            execution_time_seconds: elapsed.as_secs_f64(),
            operation_name: operation.to_string(),
            timestamp: now_rfc3339(),
        }
    }

    pub(crate) fn failure(
        operation: &str,
        code: ErrorCode,
        message: impl Into<String>,
        elapsed: Duration,
    ) -> Self {
        Self {
            success: false,
            payload: Payload::new(),
            error: Some(message.into()),
            error_code: Some(code),
            execution_time_seconds: elapsed.as_secs_f64(),
            operation_name: operation.to_string(),
            timestamp: now_rfc3339(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.payload.get(key)
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|e| {
            serde_json::json!({
                "success": false,
                "error": format!("failed to serialize result: {e}"),
                "errorCode": ErrorCode::ExecutionError,
                "operationName": self.operation_name,
            })
        })
    }
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
