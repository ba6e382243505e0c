//! HTTP implementation of the engine's remote transport.

use async_trait::async_trait;
use fieldsync_core::util::compact_text;
use fieldsync_core::{
    EntityKey, EntitySnapshot, OperationType, RemoteAck, RemoteError, RemoteOperation,
    RemoteTransport,
};
use reqwest::header::{ACCEPT, IF_MATCH, IF_NONE_MATCH};
use reqwest::{StatusCode, Url};
use serde::Deserialize;

use crate::cli_config::RemoteSettings;
use crate::error::CliError;

const IDEMPOTENCY_KEY: &str = "Idempotency-Key";

/// Talks to `{base}/v1/entities/{type}/{id}`
#[derive(Clone)]
pub struct HttpRemoteTransport {
    base_url: Url,
    auth_token: Option<String>,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct AckBody {
    version: i64,
}

#[derive(Debug, Deserialize)]
struct EntityBody {
    version: i64,
    #[serde(default)]
    payload: serde_json::Value,
    #[serde(default)]
    updated_at: i64,
}

#[derive(Debug, Deserialize)]
struct ConflictBody {
    remote_version: Option<i64>,
    version: Option<i64>,
}

impl HttpRemoteTransport {
    pub fn new(settings: RemoteSettings) -> Result<Self, CliError> {
        let base_url = Url::parse(&settings.base_url)
            .map_err(|error| CliError::Config(format!("Invalid remote_url: {error}")))?;
        if base_url.cannot_be_a_base() {
            return Err(CliError::Config(format!(
                "remote_url cannot be used as a base: {base_url}"
            )));
        }
        let client = reqwest::Client::builder()
            .build()
            .map_err(|error| CliError::Config(format!("Failed to construct HTTP client: {error}")))?;
        Ok(Self {
            base_url,
            auth_token: settings.auth_token,
            client,
        })
    }

    pub fn entity_url(&self, key: &EntityKey) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().extend([
                "v1",
                "entities",
                key.entity_type.as_str(),
                key.entity_id.as_str(),
            ]);
        }
        url
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.auth_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

#[async_trait]
impl RemoteTransport for HttpRemoteTransport {
    async fn apply(&self, operation: RemoteOperation) -> Result<RemoteAck, RemoteError> {
        let url = self.entity_url(&operation.key);
        let mut request = match operation.operation_type {
            OperationType::Delete => self.client.delete(url),
            OperationType::Create | OperationType::Update => self
                .client
                .put(url)
                .json(&serde_json::json!({ "payload": operation.payload })),
        };
        request = request
            .header(ACCEPT, "application/json")
            .header(IDEMPOTENCY_KEY, &operation.idempotency_key);
        request = match (operation.operation_type, operation.base_version) {
            (_, Some(base_version)) => request.header(IF_MATCH, base_version.to_string()),
            (OperationType::Create, None) => request.header(IF_NONE_MATCH, "*"),
            _ => request,
        };

        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(map_transport_error)?;
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(classify_status(status, &body));
        }

        let version = parse_ack(&body, operation.base_version)?;
        tracing::debug!(
            "{} {} acknowledged at version {version}",
            operation.operation_type,
            operation.key
        );
        Ok(RemoteAck { version })
    }

    async fn fetch(&self, key: &EntityKey) -> Result<Option<EntitySnapshot>, RemoteError> {
        let request = self
            .client
            .get(self.entity_url(key))
            .header(ACCEPT, "application/json");
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(map_transport_error)?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(classify_status(status, &body));
        }

        let entity = serde_json::from_str::<EntityBody>(&body).map_err(|error| {
            RemoteError::Transient(format!("Invalid entity payload: {error}"))
        })?;
        Ok(Some(EntitySnapshot {
            key: key.clone(),
            payload: entity.payload,
            version: entity.version,
            updated_at: entity.updated_at,
        }))
    }
}

/// Stand-in for commands that only touch local state
///
/// Any remote call fails as transient, so queued work stays queued.
pub struct UnconfiguredRemote;

#[async_trait]
impl RemoteTransport for UnconfiguredRemote {
    async fn apply(&self, _operation: RemoteOperation) -> Result<RemoteAck, RemoteError> {
        Err(RemoteError::Transient("remote is not configured".to_string()))
    }

    async fn fetch(&self, _key: &EntityKey) -> Result<Option<EntitySnapshot>, RemoteError> {
        Err(RemoteError::Transient("remote is not configured".to_string()))
    }
}

/// Version from a success body; an empty body (e.g. `204`) bumps the base
pub fn parse_ack(body: &str, base_version: Option<i64>) -> Result<i64, RemoteError> {
    if body.trim().is_empty() {
        return Ok(base_version.unwrap_or(0) + 1);
    }
    serde_json::from_str::<AckBody>(body)
        .map(|ack| ack.version)
        .map_err(|error| RemoteError::Transient(format!("Invalid acknowledgement: {error}")))
}

pub fn classify_status(status: StatusCode, body: &str) -> RemoteError {
    match status.as_u16() {
        409 | 412 => {
            let remote_version = serde_json::from_str::<ConflictBody>(body)
                .ok()
                .and_then(|conflict| conflict.remote_version.or(conflict.version))
                .unwrap_or(0);
            RemoteError::Conflict { remote_version }
        }
        408 | 429 | 500..=599 => RemoteError::Transient(format!(
            "HTTP {}: {}",
            status.as_u16(),
            compact_text(body)
        )),
        _ => RemoteError::Rejected(format!("HTTP {}: {}", status.as_u16(), compact_text(body))),
    }
}

fn map_transport_error(error: reqwest::Error) -> RemoteError {
    if error.is_timeout() {
        RemoteError::Timeout
    } else {
        RemoteError::Transient(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use fieldsync_core::{EntityId, EntityType};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::sync::oneshot;

    use super::*;

    async fn spawn_one_shot_server(
        status_line: &str,
        body: &str,
    ) -> (String, oneshot::Receiver<String>) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind test server");
        let address = listener.local_addr().expect("local address");
        let body = body.to_string();
        let response = format!(
            "HTTP/1.1 {status_line}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
            body.len(),
            body
        );
        let (sender, receiver) = oneshot::channel();

        tokio::spawn(async move {
            if let Ok((mut socket, _)) = listener.accept().await {
                let mut request_buffer = [0_u8; 4096];
                let read = socket.read(&mut request_buffer).await.unwrap_or(0);
                let _ = sender.send(String::from_utf8_lossy(&request_buffer[..read]).to_string());
                let _ = socket.write_all(response.as_bytes()).await;
            }
        });

        (format!("http://{address}"), receiver)
    }

    fn transport(base_url: String) -> HttpRemoteTransport {
        HttpRemoteTransport::new(RemoteSettings {
            base_url,
            auth_token: Some("token-1".to_string()),
        })
        .expect("transport")
    }

    fn key() -> EntityKey {
        EntityKey::new(
            EntityType::new("samples").unwrap(),
            EntityId::new("s 1").unwrap(),
        )
    }

    fn operation(operation_type: OperationType, base_version: Option<i64>) -> RemoteOperation {
        RemoteOperation {
            idempotency_key: "samples/s 1@1".to_string(),
            operation_type,
            key: key(),
            payload: serde_json::json!({"depth": 3}),
            base_version,
        }
    }

    #[test]
    fn entity_url_encodes_segments() {
        let transport = transport("https://sync.example.com/api".to_string());
        assert_eq!(
            transport.entity_url(&key()).as_str(),
            "https://sync.example.com/api/v1/entities/samples/s%201"
        );
    }

    #[test]
    fn classify_status_maps_families() {
        assert_eq!(
            classify_status(StatusCode::PRECONDITION_FAILED, r#"{"remote_version": 7}"#),
            RemoteError::Conflict { remote_version: 7 }
        );
        assert_eq!(
            classify_status(StatusCode::CONFLICT, "not json"),
            RemoteError::Conflict { remote_version: 0 }
        );
        assert!(classify_status(StatusCode::TOO_MANY_REQUESTS, "").is_retryable());
        assert!(classify_status(StatusCode::BAD_GATEWAY, "").is_retryable());
        assert!(classify_status(StatusCode::REQUEST_TIMEOUT, "").is_retryable());
        assert!(matches!(
            classify_status(StatusCode::UNPROCESSABLE_ENTITY, "bad field"),
            RemoteError::Rejected(message) if message.contains("HTTP 422")
        ));
    }

    #[test]
    fn parse_ack_handles_empty_body() {
        assert_eq!(parse_ack("", Some(4)).unwrap(), 5);
        assert_eq!(parse_ack(r#"{"version": 9}"#, Some(4)).unwrap(), 9);
        assert!(parse_ack("{}", None).is_err());
    }

    #[tokio::test]
    async fn create_sends_preconditions_and_reads_version() {
        let (url, request) = spawn_one_shot_server("201 Created", r#"{"version": 1}"#).await;

        let ack = transport(url)
            .apply(operation(OperationType::Create, None))
            .await
            .expect("apply should succeed");
        assert_eq!(ack.version, 1);

        let request = request.await.expect("captured request").to_lowercase();
        assert!(request.starts_with("put /v1/entities/samples/s%201"));
        assert!(request.contains("if-none-match: *"));
        assert!(request.contains("idempotency-key: samples/s 1@1"));
        assert!(request.contains("authorization: bearer token-1"));
    }

    #[tokio::test]
    async fn update_conflict_surfaces_remote_version() {
        let (url, request) =
            spawn_one_shot_server("412 Precondition Failed", r#"{"remote_version": 6}"#).await;

        let error = transport(url)
            .apply(operation(OperationType::Update, Some(5)))
            .await
            .expect_err("stale update should conflict");
        assert_eq!(error, RemoteError::Conflict { remote_version: 6 });
        assert!(request
            .await
            .expect("captured request")
            .to_lowercase()
            .contains("if-match: 5"));
    }

    #[tokio::test]
    async fn server_error_is_transient() {
        let (url, _request) =
            spawn_one_shot_server("503 Service Unavailable", r#"{"error":"down"}"#).await;
        let error = transport(url)
            .apply(operation(OperationType::Delete, Some(2)))
            .await
            .expect_err("503 should fail");
        assert!(error.is_retryable());
    }

    #[tokio::test]
    async fn fetch_maps_not_found_to_none() {
        let (url, _request) = spawn_one_shot_server("404 Not Found", "").await;
        assert!(transport(url).fetch(&key()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn fetch_parses_entity() {
        let body = r#"{"version": 3, "payload": {"depth": 4}, "updated_at": 1700000000000}"#;
        let (url, _request) = spawn_one_shot_server("200 OK", body).await;

        let snapshot = transport(url).fetch(&key()).await.unwrap().unwrap();
        assert_eq!(snapshot.version, 3);
        assert_eq!(snapshot.payload, serde_json::json!({"depth": 4}));
        assert_eq!(snapshot.key, key());
    }
}
