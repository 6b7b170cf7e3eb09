//! Statement execution and fetch messages
//!
//! Covers plain `execute`, the prepared-statement triple
//! (`createPreparedStatement` / `executePreparedStatement` /
//! `closePreparedStatement`, whose close request lives in the module root)
//! and result-set paging via `fetch`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::Attributes;

/// Result-type discriminator: affected-row count only
pub const RESULT_TYPE_ROW_COUNT: &str = "rowCount";
/// Result-type discriminator: row data, inline or paged
pub const RESULT_TYPE_RESULT_SET: &str = "resultSet";

/// `execute` request (no binds)
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct ExecuteRequest {
    pub command: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attributes: Option<Attributes>,
    pub sql_text: String,
}

impl ExecuteRequest {
    /// Build an execute request, optionally scoped to a schema
    pub fn new(sql: impl Into<String>, schema: Option<&str>) -> Self {
        Self {
            command: "execute",
            attributes: schema.map(Attributes::current_schema),
            sql_text: sql.into(),
        }
    }
}

/// `createPreparedStatement` request
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct CreatePreparedRequest {
    pub command: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attributes: Option<Attributes>,
    pub sql_text: String,
}

impl CreatePreparedRequest {
    /// Build a prepare request, optionally scoped to a schema
    pub fn new(sql: impl Into<String>, schema: Option<&str>) -> Self {
        Self {
            command: "createPreparedStatement",
            attributes: schema.map(Attributes::current_schema),
            sql_text: sql.into(),
        }
    }
}

/// `executePreparedStatement` request with columnar bind data
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct ExecutePreparedRequest {
    pub command: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attributes: Option<Attributes>,
    pub statement_handle: i64,
    pub num_columns: usize,
    pub num_rows: usize,
    pub columns: Vec<Column>,
    /// Column-major: one inner vec per column
    pub data: Vec<Vec<Value>>,
}

/// `fetch` request for one page of a result set
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct FetchRequest {
    pub command: &'static str,
    pub result_set_handle: i64,
    pub start_position: u64,
    pub num_bytes: u64,
}

impl FetchRequest {
    /// Build a fetch for the page beginning at `start_position`
    pub fn new(result_set_handle: i64, start_position: u64, num_bytes: u64) -> Self {
        Self {
            command: "fetch",
            result_set_handle,
            start_position,
            num_bytes,
        }
    }
}

/// Column descriptor: name plus data-type record
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[allow(missing_docs)]
pub struct Column {
    pub name: String,
    #[serde(rename = "dataType")]
    pub data_type: DataType,
}

/// Wire data-type record
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DataType {
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precision: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub character_set: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub with_local_time_zone: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fraction: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub srid: Option<i64>,
}

impl DataType {
    /// A bare type record with just the type name
    pub fn named(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            ..Self::default()
        }
    }
}

/// `responseData` for `execute` / `executePreparedStatement`
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct ExecuteData {
    #[serde(default)]
    pub num_results: u64,
    #[serde(default)]
    pub results: Vec<QueryResultBlock>,
}

/// One result within an execute response
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct QueryResultBlock {
    pub result_type: String,
    #[serde(default)]
    pub row_count: Option<i64>,
    #[serde(default)]
    pub result_set: Option<ResultSetBlock>,
}

impl QueryResultBlock {
    /// Affected-row count, defaulting to zero for result-set results
    pub fn row_count(&self) -> i64 {
        self.row_count.unwrap_or(0)
    }
}

/// Result-set payload: inline data, or a handle for paged fetching.
/// The two forms are mutually exclusive.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct ResultSetBlock {
    #[serde(default)]
    pub result_set_handle: Option<i64>,
    #[serde(default)]
    pub num_columns: usize,
    #[serde(default)]
    pub num_rows: u64,
    #[serde(default)]
    pub num_rows_in_message: u64,
    #[serde(default)]
    pub columns: Vec<Column>,
    /// Column-major data block
    #[serde(default)]
    pub data: Vec<Vec<Value>>,
}

/// `responseData` for `createPreparedStatement`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct CreatePreparedData {
    pub statement_handle: i64,
    #[serde(default)]
    pub parameter_data: ParameterData,
}

/// Parameter schema of a prepared statement
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct ParameterData {
    #[serde(default)]
    pub num_columns: usize,
    #[serde(default)]
    pub columns: Vec<Column>,
}

/// `responseData` for `fetch`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct FetchData {
    #[serde(default)]
    pub num_rows: u64,
    /// Column-major data block
    #[serde(default)]
    pub data: Vec<Vec<Value>>,
}
