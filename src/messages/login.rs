//! Login handshake messages
//!
//! Login is two round-trips: a `login` command that fetches the server's
//! RSA public key, then an auth request (no `command` field, per the
//! protocol) carrying the encrypted password and client identification.

use serde::{Deserialize, Serialize};

use super::Attributes;

/// First login step
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct LoginRequest {
    pub command: &'static str,
    pub protocol_version: u16,
}

impl LoginRequest {
    /// Build a login request for protocol version 1
    pub fn new() -> Self {
        Self {
            command: "login",
            protocol_version: 1,
        }
    }
}

impl Default for LoginRequest {
    fn default() -> Self {
        Self::new()
    }
}

/// Server's reply to `login`: the RSA public key for password encryption
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginData {
    /// Key modulus as a hex string
    pub public_key_modulus: String,
    /// Key exponent as a hex string
    pub public_key_exponent: String,
    /// PEM rendition of the same key, unused here
    #[serde(default)]
    pub public_key_pem: Option<String>,
}

/// Second login step. Carries no `command` field.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct AuthRequest {
    pub username: String,
    /// RSA-encrypted, base64-encoded password
    pub password: String,
    pub use_compression: bool,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub client_name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub client_version: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub driver_name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub client_os: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub client_os_username: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub client_runtime: String,
    pub attributes: Attributes,
}

/// Session metadata returned on successful authentication
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct SessionData {
    pub session_id: u64,
    #[serde(default)]
    pub protocol_version: f64,
    #[serde(default)]
    pub release_version: String,
    #[serde(default)]
    pub database_name: String,
    #[serde(default)]
    pub product_name: String,
    #[serde(default)]
    pub max_data_message_size: u64,
    #[serde(default)]
    pub max_identifier_length: u64,
    #[serde(default)]
    pub max_varchar_length: u64,
    #[serde(default)]
    pub identifier_quote_string: String,
    #[serde(default)]
    pub time_zone: String,
    #[serde(default)]
    pub time_zone_behavior: String,
}
