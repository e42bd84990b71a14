//! Coinbase dialect: post-connect JSON subscribe.
//!
//! Private channels add a signed header set to the subscribe payload:
//! the prehash is `timestamp + "GET" + /users/self/verify`, signed with
//! HMAC-SHA256 over the base64-decoded secret.

use market_core::{time, VenueId};

use crate::auth::{coinbase_ws_signature, Credentials};
use crate::error::ClientError;
use crate::scan;
use crate::session::{Ack, Dialect};

const PRIVATE_CHANNELS: &[&str] = &["full", "user"];
const AUTH_REQUEST_PATH: &str = "/users/self/verify";

pub struct CoinbaseDialect {
    product_ids: Vec<String>,
    channels: Vec<String>,
    credentials: Option<Credentials>,
}

impl CoinbaseDialect {
    pub fn new(product_ids: Vec<String>, channels: Vec<String>) -> Self {
        CoinbaseDialect {
            product_ids,
            channels,
            credentials: None,
        }
    }

    pub fn set_credentials(&mut self, credentials: Credentials) {
        self.credentials = Some(credentials);
    }

    fn has_private_channel(&self) -> bool {
        self.channels
            .iter()
            .any(|c| PRIVATE_CHANNELS.contains(&c.as_str()))
    }

    fn build_subscribe(&self) -> Result<String, ClientError> {
        let mut msg = serde_json::json!({
            "type": "subscribe",
            "product_ids": self.product_ids,
            "channels": self.channels,
        });

        if self.has_private_channel() {
            let Some(creds) = &self.credentials else {
                return Err(ClientError::Auth(
                    "private channel subscribed without credentials".to_string(),
                ));
            };
            let timestamp = (time::now_ns() / 1_000_000_000).to_string();
            let signature = coinbase_ws_signature(&creds.api_secret, &timestamp, AUTH_REQUEST_PATH)
                .map_err(|e| ClientError::Auth(e.to_string()))?;

            if let Some(obj) = msg.as_object_mut() {
                obj.insert("signature".to_string(), signature.into());
                obj.insert("key".to_string(), creds.api_key.clone().into());
                obj.insert(
                    "passphrase".to_string(),
                    creds.passphrase.clone().unwrap_or_default().into(),
                );
                obj.insert("timestamp".to_string(), timestamp.into());
            }
        }

        Ok(msg.to_string())
    }
}

impl Dialect for CoinbaseDialect {
    fn venue(&self) -> VenueId {
        VenueId::Coinbase
    }

    fn request_path(&self, configured: &str) -> String {
        configured.to_string()
    }

    async fn subscribe_frames(&mut self) -> Result<Vec<String>, ClientError> {
        Ok(vec![self.build_subscribe()?])
    }

    fn classify_ack(&self, frame: &str) -> Ack {
        let buf = frame.as_bytes();
        let Some(t) = scan::find_value_after_key(buf, "type") else {
            return Ack::Pending;
        };
        match scan::str_value(buf, t) {
            "subscriptions" => Ack::Confirmed,
            "error" => {
                let reason = scan::find_value_after_key(buf, "message")
                    .or_else(|| scan::find_value_after_key(buf, "reason"))
                    .map(|v| scan::str_value(buf, v).to_string())
                    .unwrap_or_else(|| frame.to_string());
                Ack::Rejected(reason)
            }
            _ => Ack::Data,
        }
    }
}
