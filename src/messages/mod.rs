//! Wire protocol messages
//!
//! Typed request/response envelopes for every command of the websocket
//! API. Requests serialize with a `command` discriminator field; responses
//! arrive wrapped in a common envelope carrying `status`, an optional
//! `exception`, optional session `attributes`, and the per-command
//! `responseData` block.

mod execute;
mod login;

pub use execute::{
    Column, CreatePreparedData, CreatePreparedRequest, DataType, ExecuteData,
    ExecutePreparedRequest, ExecuteRequest, FetchData, FetchRequest, ParameterData,
    QueryResultBlock, ResultSetBlock, RESULT_TYPE_RESULT_SET, RESULT_TYPE_ROW_COUNT,
};
pub use login::{AuthRequest, LoginData, LoginRequest, SessionData};

use serde::{Deserialize, Serialize};

/// Response envelope common to every command
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
pub struct Response<T> {
    /// "ok" on success
    pub status: String,
    /// Present when `status != "ok"`
    #[serde(default)]
    pub exception: Option<Exception>,
    /// Session attributes piggybacked on the response
    #[serde(default)]
    pub attributes: Option<Attributes>,
    /// Command-specific payload
    #[serde(default)]
    pub response_data: Option<T>,
}

impl<T> Response<T> {
    /// Whether the server accepted the command
    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

/// Server-reported failure detail
#[derive(Debug, Clone, Deserialize)]
pub struct Exception {
    /// Human-readable error text
    pub text: String,
    /// Five-character SQLSTATE-like code
    #[serde(default)]
    pub sqlcode: Option<String>,
}

/// Session attributes.
///
/// Every field is optional so that a `setAttributes` request carries only
/// what the caller set, while `false` and `0` still serialize literally
/// when present.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct Attributes {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub autocommit: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compression_enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_schema: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datetime_format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_like_escape_character: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback_interval: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub numeric_characters: Option<String>,
    /// 1/0 on the wire rather than a boolean
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub open_transaction: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_timeout: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_transactions_enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp_utc_enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    #[serde(
        default,
        rename = "timeZoneBehavior",
        skip_serializing_if = "Option::is_none"
    )]
    pub time_zone_behavior: Option<String>,
}

impl Attributes {
    /// Attributes block that only sets autocommit
    pub fn autocommit(on: bool) -> Self {
        Self {
            autocommit: Some(on),
            ..Self::default()
        }
    }

    /// Attributes block that only sets the current schema
    pub fn current_schema(schema: impl Into<String>) -> Self {
        Self {
            current_schema: Some(schema.into()),
            ..Self::default()
        }
    }

    /// Attributes block that only sets the query timeout
    pub fn query_timeout(seconds: u32) -> Self {
        Self {
            query_timeout: Some(seconds),
            ..Self::default()
        }
    }
}

/// Command with no payload beyond the optional attributes block
/// (`disconnect`, `getAttributes`)
#[derive(Debug, Serialize)]
#[allow(missing_docs)]
pub struct PlainCommand {
    pub command: &'static str,
}

/// `setAttributes` request
#[derive(Debug, Serialize)]
#[allow(missing_docs)]
pub struct SetAttributesRequest {
    pub command: &'static str,
    pub attributes: Attributes,
}

impl SetAttributesRequest {
    /// Build a `setAttributes` request for the given block
    pub fn new(attributes: Attributes) -> Self {
        Self {
            command: "setAttributes",
            attributes,
        }
    }
}

/// `closePreparedStatement` request
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct ClosePreparedRequest {
    pub command: &'static str,
    pub statement_handle: i64,
}

impl ClosePreparedRequest {
    /// Build a close request for the given handle
    pub fn new(statement_handle: i64) -> Self {
        Self {
            command: "closePreparedStatement",
            statement_handle,
        }
    }
}

/// `closeResultSet` request
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct CloseResultSetRequest {
    pub command: &'static str,
    pub result_set_handles: Vec<i64>,
}

impl CloseResultSetRequest {
    /// Build a close request for one result-set handle
    pub fn new(handle: i64) -> Self {
        Self {
            command: "closeResultSet",
            result_set_handles: vec![handle],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_autocommit_false_is_transmitted() {
        // A disabled autocommit must reach the wire as a literal `false`,
        // not vanish as an omitted default.
        let req = SetAttributesRequest::new(Attributes::autocommit(false));
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "command": "setAttributes",
                "attributes": {"autocommit": false}
            })
        );
    }

    #[test]
    fn test_unset_attributes_are_omitted() {
        let json = serde_json::to_value(Attributes::query_timeout(120)).unwrap();
        assert_eq!(json, serde_json::json!({"queryTimeout": 120}));
    }

    #[test]
    fn test_envelope_error_parse() {
        let value = serde_json::json!({
            "status": "error",
            "exception": {"text": "syntax error", "sqlcode": "42000"}
        });
        let resp: Response<ExecuteData> = serde_json::from_value(value).unwrap();
        assert!(!resp.is_ok());
        let exception = resp.exception.unwrap();
        assert_eq!(exception.text, "syntax error");
        assert_eq!(exception.sqlcode.as_deref(), Some("42000"));
    }

    #[test]
    fn test_envelope_attributes_only() {
        // Responses like getAttributes carry attributes and no responseData.
        let value = serde_json::json!({
            "status": "ok",
            "attributes": {"autocommit": true, "queryTimeout": 0}
        });
        let resp: Response<ExecuteData> = serde_json::from_value(value).unwrap();
        assert!(resp.is_ok());
        assert!(resp.response_data.is_none());
        assert_eq!(resp.attributes.unwrap().autocommit, Some(true));
    }
}
