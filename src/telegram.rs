use crate::error::{BeaconError, BeaconResult};
use crate::settings::Credentials;
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

pub const DEFAULT_API_BASE: &str = "https://api.telegram.org";
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// One inbound update. Anything but a text message is carried as `message: None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<Message>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub chat: Chat,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    #[serde(default)]
    description: Option<String>,
}

/// Outbound and inbound operations of the messaging service.
///
/// Implementations must not retry; callers decide what a failure means.
#[async_trait]
pub trait MessagingBackend: Send + Sync {
    /// Updates with `update_id >= offset`. A negative offset counts from the newest.
    async fn get_updates(&self, bot_token: &str, offset: i64) -> BeaconResult<Vec<Update>>;

    async fn send_message(&self, to: &Credentials, text: &str) -> BeaconResult<()>;

    async fn send_location(&self, to: &Credentials, latitude: f64, longitude: f64)
        -> BeaconResult<()>;

    async fn send_document(
        &self,
        to: &Credentials,
        file_name: &str,
        contents: Vec<u8>,
        caption: &str,
    ) -> BeaconResult<()>;
}

/// Bot API client over HTTPS.
pub struct TelegramClient {
    client: reqwest::Client,
    base_url: String,
}

impl TelegramClient {
    pub fn new(base_url: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .user_agent(concat!("track_beacon/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        TelegramClient {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn method_url(&self, bot_token: &str, method: &str) -> String {
        format!("{}/bot{}/{}", self.base_url, bot_token, method)
    }

    async fn call<T: DeserializeOwned>(&self, request: reqwest::RequestBuilder) -> BeaconResult<T> {
        // the token is part of the path, keep it out of error text
        let response = request.send().await.map_err(|e| e.without_url())?;
        let status = response.status();
        let body = response.text().await.map_err(|e| e.without_url())?;

        let parsed: ApiResponse<T> = match serde_json::from_str(&body) {
            Ok(parsed) => parsed,
            Err(e) if status.is_success() => return Err(e.into()),
            Err(_) => return Err(BeaconError::Backend(format!("HTTP {}", status.as_u16()))),
        };

        if !parsed.ok {
            let reason = parsed
                .description
                .unwrap_or_else(|| format!("HTTP {}", status.as_u16()));
            return Err(BeaconError::Backend(reason));
        }
        parsed
            .result
            .ok_or_else(|| BeaconError::Backend("response without result".into()))
    }
}

#[async_trait]
impl MessagingBackend for TelegramClient {
    async fn get_updates(&self, bot_token: &str, offset: i64) -> BeaconResult<Vec<Update>> {
        let request = self
            .client
            .get(self.method_url(bot_token, "getUpdates"))
            .query(&[("offset", offset.to_string()), ("timeout", "0".to_string())]);
        let raw: Vec<Value> = self.call(request).await?;
        Ok(parse_updates(raw))
    }

    async fn send_message(&self, to: &Credentials, text: &str) -> BeaconResult<()> {
        let request = self
            .client
            .get(self.method_url(&to.bot_token, "sendMessage"))
            .query(&[("chat_id", to.chat_id.as_str()), ("text", text)]);
        let _: Value = self.call(request).await?;
        Ok(())
    }

    async fn send_location(
        &self,
        to: &Credentials,
        latitude: f64,
        longitude: f64,
    ) -> BeaconResult<()> {
        let request = self
            .client
            .get(self.method_url(&to.bot_token, "sendLocation"))
            .query(&[
                ("chat_id", to.chat_id.clone()),
                ("latitude", latitude.to_string()),
                ("longitude", longitude.to_string()),
            ]);
        let _: Value = self.call(request).await?;
        Ok(())
    }

    async fn send_document(
        &self,
        to: &Credentials,
        file_name: &str,
        contents: Vec<u8>,
        caption: &str,
    ) -> BeaconResult<()> {
        let part = Part::bytes(contents)
            .file_name(file_name.to_string())
            .mime_str("application/geo+json")?;
        let form = Form::new()
            .text("chat_id", to.chat_id.clone())
            .text("caption", caption.to_string())
            .part("document", part);

        let request = self
            .client
            .post(self.method_url(&to.bot_token, "sendDocument"))
            .multipart(form);
        let _: Value = self.call(request).await?;
        Ok(())
    }
}

/// Decode each update on its own. A malformed entry keeps its id so the
/// cursor still moves past it.
pub fn parse_updates(raw: Vec<Value>) -> Vec<Update> {
    raw.into_iter()
        .filter_map(|value| match serde_json::from_value::<Update>(value.clone()) {
            Ok(update) => Some(update),
            Err(e) => {
                let update_id = value.get("update_id").and_then(Value::as_i64)?;
                log::debug!("Skipping malformed update {}: {}", update_id, e);
                Some(Update {
                    update_id,
                    message: None,
                })
            }
        })
        .collect()
}


#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_method_url() {
        let client = TelegramClient::new("https://api.example.org/");
        assert_eq!(
            client.method_url("123:abc", "getUpdates"),
            "https://api.example.org/bot123:abc/getUpdates"
        );
    }

    #[test]
    fn test_parse_updates_keeps_ids_of_malformed_entries() {
        let raw = vec![
            json!({"update_id": 10, "message": {"message_id": 1, "chat": {"id": 42}, "text": "/status"}}),
            json!({"update_id": 11, "edited_message": {"chat": {"id": 42}}}),
            json!({"update_id": 12, "message": {"chat": "not-an-object"}}),
            json!({"no_id": true}),
        ];
        let updates = parse_updates(raw);

        assert_eq!(updates.len(), 3);
        assert_eq!(
            updates[0].message.as_ref().and_then(|m| m.text.as_deref()),
            Some("/status")
        );
        assert_eq!(updates[0].message.as_ref().map(|m| m.chat.id), Some(42));
        assert!(updates[1].message.is_none());
        assert_eq!(updates[2].update_id, 12);
        assert!(updates[2].message.is_none());
    }

    #[tokio::test]
    async fn test_transport_error_does_not_leak_token() {
        let client = TelegramClient::new("http://127.0.0.1:1");
        let err = client
            .get_updates("123456:SECRETSECRET", 0)
            .await
            .unwrap_err();
        assert!(matches!(err, BeaconError::Http(_)));
        let text = err.to_string();
        assert!(!text.contains("SECRETSECRET"), "token leaked: {}", text);
    }

    #[test]
    fn test_api_error_response_decodes() {
        let parsed: ApiResponse<Value> =
            serde_json::from_str(r#"{"ok":false,"error_code":401,"description":"Unauthorized"}"#)
                .unwrap();
        assert!(!parsed.ok);
        assert_eq!(parsed.description.as_deref(), Some("Unauthorized"));
        assert!(parsed.result.is_none());
    }
}
