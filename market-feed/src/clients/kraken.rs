//! Kraken v2 dialect: JSON-RPC-like subscribe envelope.
//!
//! Private channels require a short-lived WebSocket token fetched from
//! the REST API before subscribing; the token request is signed with
//! HMAC-SHA512 over `path ++ SHA256(nonce ++ postdata)`.

use market_core::{time, VenueId};

use crate::auth::{kraken_rest_signature, Credentials};
use crate::error::ClientError;
use crate::scan;
use crate::session::{Ack, Dialect};

const PRIVATE_CHANNELS: &[&str] = &["executions", "level3", "balances"];
const TOKEN_PATH: &str = "/0/private/GetWebSocketsToken";
const DEFAULT_API_BASE: &str = "https://api.kraken.com";

pub struct KrakenDialect {
    channel: String,
    symbols: Vec<String>,
    credentials: Option<Credentials>,
    tls_verify: bool,
    api_base: String,
}

impl KrakenDialect {
    pub fn new(channel: impl Into<String>, symbols: Vec<String>) -> Self {
        KrakenDialect {
            channel: channel.into(),
            symbols,
            credentials: None,
            tls_verify: true,
            api_base: DEFAULT_API_BASE.to_string(),
        }
    }

    pub fn set_credentials(&mut self, credentials: Credentials) {
        self.credentials = Some(credentials);
    }

    pub fn set_tls_verify(&mut self, verify: bool) {
        self.tls_verify = verify;
    }

    #[cfg(test)]
    fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into();
        self
    }

    fn needs_authentication(&self) -> bool {
        PRIVATE_CHANNELS.contains(&self.channel.as_str())
    }

    async fn fetch_ws_token(&self, creds: &Credentials) -> Result<String, ClientError> {
        let nonce = (time::now_ns() / 1_000).to_string();
        let postdata = format!("nonce={nonce}");
        let signature = kraken_rest_signature(&creds.api_secret, TOKEN_PATH, &nonce, &postdata)
            .map_err(|e| ClientError::Auth(e.to_string()))?;

        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(!self.tls_verify)
            .build()?;
        let response: serde_json::Value = client
            .post(format!("{}{}", self.api_base, TOKEN_PATH))
            .header("API-Key", &creds.api_key)
            .header("API-Sign", signature)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body(postdata)
            .send()
            .await?
            .json()
            .await?;

        if let Some(errors) = response["error"].as_array() {
            if !errors.is_empty() {
                let joined = errors
                    .iter()
                    .filter_map(|e| e.as_str())
                    .collect::<Vec<_>>()
                    .join(", ");
                return Err(ClientError::Auth(joined));
            }
        }

        response["result"]["token"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| ClientError::Auth("token missing from response".to_string()))
    }
}

impl Dialect for KrakenDialect {
    fn venue(&self) -> VenueId {
        VenueId::Kraken
    }

    fn request_path(&self, configured: &str) -> String {
        configured.to_string()
    }

    async fn subscribe_frames(&mut self) -> Result<Vec<String>, ClientError> {
        let mut params = serde_json::json!({
            "channel": self.channel,
            "symbol": self.symbols,
        });

        if self.needs_authentication() {
            let Some(creds) = self.credentials.clone() else {
                return Err(ClientError::Auth(
                    "private channel subscribed without credentials".to_string(),
                ));
            };
            let token = self.fetch_ws_token(&creds).await?;
            if let Some(obj) = params.as_object_mut() {
                obj.insert("token".to_string(), token.into());
            }
        }

        let msg = serde_json::json!({
            "method": "subscribe",
            "params": params,
        });
        Ok(vec![msg.to_string()])
    }

    fn classify_ack(&self, frame: &str) -> Ack {
        let buf = frame.as_bytes();

        if let Some(m) = scan::find_value_after_key(buf, "method") {
            if scan::str_value(buf, m) == "subscribe" {
                if let Some(s) = scan::find_value_after_key(buf, "success") {
                    if buf.get(s) == Some(&b't') {
                        return Ack::Confirmed;
                    }
                    let reason = scan::find_value_after_key(buf, "error")
                        .map(|v| scan::str_value(buf, v).to_string())
                        .unwrap_or_else(|| frame.to_string());
                    return Ack::Rejected(reason);
                }
            }
            return Ack::Pending;
        }

        match scan::find_value_after_key(buf, "channel") {
            Some(c) => match scan::str_value(buf, c) {
                "status" | "heartbeat" => Ack::Pending,
                _ => Ack::Data,
            },
            None => Ack::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_public_subscribe_envelope() {
        let mut dialect = KrakenDialect::new("trade", vec!["BTC/USD".to_string()]);
        let frames = dialect.subscribe_frames().await.unwrap();
        assert_eq!(frames.len(), 1);

        let msg: serde_json::Value = serde_json::from_str(&frames[0]).unwrap();
        assert_eq!(msg["method"], "subscribe");
        assert_eq!(msg["params"]["channel"], "trade");
        assert_eq!(msg["params"]["symbol"][0], "BTC/USD");
        assert!(msg["params"].get("token").is_none());
    }

    #[tokio::test]
    async fn test_private_channel_requires_credentials() {
        let mut dialect =
            KrakenDialect::new("executions", vec![]).with_api_base("http://127.0.0.1:1");
        assert!(matches!(
            dialect.subscribe_frames().await,
            Err(ClientError::Auth(_))
        ));
    }

    #[test]
    fn test_ack_classification() {
        let dialect = KrakenDialect::new("trade", vec![]);

        assert!(matches!(
            dialect.classify_ack(
                r#"{"method":"subscribe","success":true,"result":{"channel":"trade"}}"#
            ),
            Ack::Confirmed
        ));
        match dialect.classify_ack(
            r#"{"method":"subscribe","success":false,"error":"Subscription depth not supported"}"#,
        ) {
            Ack::Rejected(reason) => assert_eq!(reason, "Subscription depth not supported"),
            _ => panic!("expected rejection"),
        }
        assert!(matches!(
            dialect.classify_ack(r#"{"channel":"status","type":"update","data":[]}"#),
            Ack::Pending
        ));
        assert!(matches!(
            dialect.classify_ack(r#"{"channel":"trade","type":"update","data":[]}"#),
            Ack::Data
        ));
    }

    #[test]
    fn test_private_channel_detection() {
        assert!(KrakenDialect::new("executions", vec![]).needs_authentication());
        assert!(KrakenDialect::new("level3", vec![]).needs_authentication());
        assert!(!KrakenDialect::new("trade", vec![]).needs_authentication());
    }
}
