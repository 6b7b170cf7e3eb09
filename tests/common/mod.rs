#![allow(dead_code)]

//! Shared test support: a scripted control-channel double.
//!
//! The mock transport answers each `recv_json` from a queued script and
//! records every request, letting session tests assert on exact wire
//! traffic without a server.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rsa::traits::PublicKeyParts;
use rsa::RsaPrivateKey;
use serde_json::{json, Value};

use exasol_rs::{Config, Connection, Transport, TransportError, TransportFactory, TlsPolicy};

/// One scripted reaction to a `recv_json`
pub enum ScriptItem {
    /// Deliver this JSON message
    Respond(Value),
    /// Fail the read as an abnormal closure
    AbnormalClose,
}

/// Shared state behind every transport the factory hands out
#[derive(Clone, Default)]
pub struct Script {
    queue: Arc<Mutex<VecDeque<ScriptItem>>>,
    sent: Arc<Mutex<Vec<Value>>>,
    connected_urls: Arc<Mutex<Vec<String>>>,
}

impl Script {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response message
    pub fn respond(&self, value: Value) {
        self.queue
            .lock()
            .unwrap()
            .push_back(ScriptItem::Respond(value));
    }

    /// Queue a bare `{"status": "ok"}` response
    pub fn respond_ok(&self) {
        self.respond(json!({"status": "ok"}));
    }

    /// Queue a server error response
    pub fn respond_error(&self, text: &str) {
        self.respond(json!({
            "status": "error",
            "exception": {"text": text, "sqlcode": "00000"}
        }));
    }

    /// Queue an abnormal closure
    pub fn abnormal_close(&self) {
        self.queue.lock().unwrap().push_back(ScriptItem::AbnormalClose);
    }

    /// Everything sent on the control channel so far
    pub fn sent(&self) -> Vec<Value> {
        self.sent.lock().unwrap().clone()
    }

    /// URLs passed to `Transport::connect`
    pub fn connected_urls(&self) -> Vec<String> {
        self.connected_urls.lock().unwrap().clone()
    }

    /// A factory producing transports that share this script
    pub fn factory(&self) -> TransportFactory {
        let script = self.clone();
        Arc::new(move || Box::new(MockTransport(script.clone())))
    }
}

pub struct MockTransport(Script);

#[async_trait::async_trait]
impl Transport for MockTransport {
    async fn connect(
        &mut self,
        url: &str,
        _tls: Option<&TlsPolicy>,
        _timeout: Duration,
    ) -> Result<(), TransportError> {
        self.0.connected_urls.lock().unwrap().push(url.to_string());
        Ok(())
    }

    async fn send_json(&mut self, value: &Value) -> Result<(), TransportError> {
        self.0.sent.lock().unwrap().push(value.clone());
        Ok(())
    }

    async fn recv_json(&mut self) -> Result<Value, TransportError> {
        loop {
            let item = self.0.queue.lock().unwrap().pop_front();
            match item {
                Some(ScriptItem::Respond(value)) => return Ok(value),
                Some(ScriptItem::AbnormalClose) => {
                    return Err(TransportError::ClosedAbnormally)
                }
                // Script exhausted: behave like a silent server until the
                // test queues more.
                None => tokio::time::sleep(Duration::from_millis(5)).await,
            }
        }
    }

    fn enable_compression(&mut self, _enabled: bool) {}

    async fn close(&mut self) {}
}

/// Queue the two login responses and return the private key matching the
/// public key the script announces
pub fn queue_login_ok(script: &Script) -> RsaPrivateKey {
    let private_key = RsaPrivateKey::new(&mut rand::thread_rng(), 512).expect("keygen");
    let public_key = private_key.to_public_key();

    script.respond(json!({
        "status": "ok",
        "responseData": {
            "publicKeyModulus": hex::encode(public_key.n().to_bytes_be()),
            "publicKeyExponent": format!("{:x}", public_key.e()),
        }
    }));
    script.respond(json!({
        "status": "ok",
        "responseData": {
            "sessionId": 4321u64,
            "protocolVersion": 1.0,
            "releaseVersion": "7.1.17",
            "databaseName": "exadb",
            "productName": "EXASolution",
            "maxDataMessageSize": 67108864u64,
            "identifierQuoteString": "\"",
        }
    }));
    private_key
}

/// Base config wired to the script's transport factory
pub fn mock_config(script: &Script) -> Config {
    Config::new("127.0.0.1", 8563, "sys", "exasol").transport_factory(script.factory())
}

/// Connect through the scripted transport with login already queued
pub async fn connect_mock(script: &Script) -> Connection {
    queue_login_ok(script);
    Connection::connect(mock_config(script))
        .await
        .expect("mock connect")
}
