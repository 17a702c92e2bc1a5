//! RabbitMQ management HTTP API client
//!
//! Every object kind except bindings is declared with a PUT on its own URL,
//! which makes declare idempotent. Bindings have no stable URL until they
//! exist, so they are created with a POST (the broker de-duplicates identical
//! bindings) and deleted by looking up their `properties_key` first.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use super::{BrokerClient, BrokerError, BrokerKind, BrokerObject};
use crate::controller::credentials::CredentialsProvider;

/// Default timeout for a single management API call
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// Client for one RabbitMQ cluster's management API
pub struct ManagementClient {
    http: Client,
    base_url: String,
    credentials: Arc<dyn CredentialsProvider>,
}

#[derive(Debug, Deserialize)]
struct BindingInfo {
    #[serde(default)]
    routing_key: String,
    #[serde(default)]
    arguments: Value,
    properties_key: String,
}

impl ManagementClient {
    /// Build a client for `base_url` (e.g. `http://rabbit.ns.svc:15672`).
    pub fn new(
        base_url: &str,
        credentials: Arc<dyn CredentialsProvider>,
        ca_certificate: Option<&[u8]>,
        timeout: Duration,
    ) -> Result<Self, BrokerError> {
        let mut builder = Client::builder().timeout(timeout);
        if let Some(pem) = ca_certificate {
            let cert = reqwest::Certificate::from_pem(pem)
                .map_err(|e| BrokerError::InvalidResponse(format!("invalid CA certificate: {e}")))?;
            builder = builder.add_root_certificate(cert);
        }
        let http = builder
            .build()
            .map_err(|e| BrokerError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials,
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}{}", self.base_url, path))
            .basic_auth(
                self.credentials.get_user(),
                Some(self.credentials.get_password()),
            )
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, BrokerError> {
        let response = request
            .send()
            .await
            .map_err(|e| BrokerError::Network(e.to_string()))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(BrokerError::from_status(status.as_u16(), body))
    }

    async fn declare_binding(&self, object: &BrokerObject) -> Result<(), BrokerError> {
        let path = binding_path(object)?;
        let body = serde_json::json!({
            "routing_key": object.properties.get("routing_key").cloned().unwrap_or(Value::from("")),
            "arguments": binding_arguments(object),
        });
        self.send(self.request(Method::POST, &path).json(&body))
            .await
            .map(|_| ())
    }

    async fn delete_binding(&self, object: &BrokerObject) -> Result<(), BrokerError> {
        let path = binding_path(object)?;
        let existing: Vec<BindingInfo> = self
            .send(self.request(Method::GET, &path))
            .await?
            .json()
            .await
            .map_err(|e| BrokerError::InvalidResponse(e.to_string()))?;

        let routing_key = object
            .properties
            .get("routing_key")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let arguments = binding_arguments(object);

        let Some(binding) = existing
            .iter()
            .find(|b| b.routing_key == routing_key && same_arguments(&b.arguments, &arguments))
        else {
            debug!(binding = %object.name, "no matching binding on broker");
            return Err(BrokerError::NotFound);
        };

        let delete_path = format!("{}/{}", path, encode(&binding.properties_key));
        self.send(self.request(Method::DELETE, &delete_path))
            .await
            .map(|_| ())
    }
}

#[async_trait]
impl BrokerClient for ManagementClient {
    async fn declare(&self, object: &BrokerObject) -> Result<(), BrokerError> {
        debug!(kind = %object.kind, vhost = %object.vhost, name = %object.name, "declare");
        if object.kind == BrokerKind::Binding {
            return self.declare_binding(object).await;
        }
        let path = object_path(object);
        self.send(self.request(Method::PUT, &path).json(&object.properties))
            .await
            .map(|_| ())
    }

    async fn delete(&self, object: &BrokerObject) -> Result<(), BrokerError> {
        debug!(kind = %object.kind, vhost = %object.vhost, name = %object.name, "delete");
        if object.kind == BrokerKind::Binding {
            return self.delete_binding(object).await;
        }
        let path = object_path(object);
        self.send(self.request(Method::DELETE, &path))
            .await
            .map(|_| ())
    }
}

fn encode(segment: &str) -> String {
    urlencoding::encode(segment).into_owned()
}

fn object_path(object: &BrokerObject) -> String {
    let vhost = encode(&object.vhost);
    let name = encode(&object.name);
    match object.kind {
        BrokerKind::Queue => format!("/api/queues/{vhost}/{name}"),
        BrokerKind::Exchange => format!("/api/exchanges/{vhost}/{name}"),
        BrokerKind::Vhost => format!("/api/vhosts/{name}"),
        BrokerKind::User => format!("/api/users/{name}"),
        BrokerKind::Permission => format!("/api/permissions/{vhost}/{name}"),
        BrokerKind::Policy => format!("/api/policies/{vhost}/{name}"),
        BrokerKind::Shovel => format!("/api/parameters/shovel/{vhost}/{name}"),
        BrokerKind::Federation => format!("/api/parameters/federation-upstream/{vhost}/{name}"),
        BrokerKind::SchemaReplication => format!("/api/global-parameters/{name}"),
        BrokerKind::Binding => format!("/api/bindings/{vhost}"),
    }
}

fn binding_path(object: &BrokerObject) -> Result<String, BrokerError> {
    let field = |key: &str| {
        object
            .properties
            .get(key)
            .and_then(Value::as_str)
            .ok_or_else(|| BrokerError::InvalidResponse(format!("binding is missing {key}")))
    };
    let destination_type = match field("destination_type")? {
        "exchange" => "e",
        _ => "q",
    };
    Ok(format!(
        "/api/bindings/{}/e/{}/{}/{}",
        encode(&object.vhost),
        encode(field("source")?),
        destination_type,
        encode(field("destination")?)
    ))
}

fn binding_arguments(object: &BrokerObject) -> Value {
    match object.properties.get("arguments") {
        Some(Value::Object(map)) => Value::Object(map.clone()),
        _ => Value::Object(Default::default()),
    }
}

fn same_arguments(found: &Value, wanted: &Value) -> bool {
    let empty = |v: &Value| v.is_null() || v.as_object().is_some_and(|m| m.is_empty());
    (empty(found) && empty(wanted)) || found == wanted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::credentials::StaticCredentials;
    use serde_json::json;
    use wiremock::matchers::{basic_auth, body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> ManagementClient {
        ManagementClient::new(
            &server.uri(),
            Arc::new(StaticCredentials::new("guest", "guest")),
            None,
            Duration::from_secs(2),
        )
        .unwrap()
    }

    fn queue(name: &str) -> BrokerObject {
        BrokerObject::new(
            BrokerKind::Queue,
            "/",
            name,
            json!({"durable": true, "auto_delete": false, "arguments": {}}),
        )
    }

    fn binding() -> BrokerObject {
        BrokerObject::new(
            BrokerKind::Binding,
            "/",
            "orders->orders-0",
            json!({
                "source": "orders",
                "destination": "orders-0",
                "destination_type": "queue",
                "routing_key": "0",
                "arguments": {"x-stream-partition-order": 0}
            }),
        )
    }

    #[tokio::test]
    async fn declare_queue_puts_properties() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/api/queues/%2F/q1"))
            .and(basic_auth("guest", "guest"))
            .and(body_json(json!({"durable": true, "auto_delete": false, "arguments": {}})))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        client_for(&server).declare(&queue("q1")).await.unwrap();
    }

    #[tokio::test]
    async fn declare_rejected_is_terminal() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/api/queues/%2F/q1"))
            .respond_with(
                ResponseTemplate::new(400).set_body_string("PRECONDITION_FAILED - inequivalent arg"),
            )
            .mount(&server)
            .await;

        let err = client_for(&server).declare(&queue("q1")).await.unwrap_err();
        assert!(matches!(err, BrokerError::Rejected { status: 400, .. }));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn declare_during_broker_boot_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = client_for(&server).declare(&queue("q1")).await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn unreachable_broker_is_network_error() {
        let client = ManagementClient::new(
            "http://127.0.0.1:1",
            Arc::new(StaticCredentials::new("guest", "guest")),
            None,
            Duration::from_millis(500),
        )
        .unwrap();
        let err = client.declare(&queue("q1")).await.unwrap_err();
        assert!(matches!(err, BrokerError::Network(_)));
    }

    #[tokio::test]
    async fn delete_missing_queue_reports_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/api/queues/%2F/gone"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let err = client_for(&server).delete(&queue("gone")).await.unwrap_err();
        assert_eq!(err, BrokerError::NotFound);
    }

    #[tokio::test]
    async fn declare_binding_posts_to_source_destination_path() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/bindings/%2F/e/orders/q/orders-0"))
            .and(body_json(json!({
                "routing_key": "0",
                "arguments": {"x-stream-partition-order": 0}
            })))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        client_for(&server).declare(&binding()).await.unwrap();
    }

    #[tokio::test]
    async fn delete_binding_resolves_properties_key() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/bindings/%2F/e/orders/q/orders-0"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"routing_key": "1", "arguments": {}, "properties_key": "1"},
                {
                    "routing_key": "0",
                    "arguments": {"x-stream-partition-order": 0},
                    "properties_key": "0~abc"
                }
            ])))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/api/bindings/%2F/e/orders/q/orders-0/0~abc"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        client_for(&server).delete(&binding()).await.unwrap();
    }

    #[tokio::test]
    async fn delete_binding_without_match_is_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/bindings/%2F/e/orders/q/orders-0"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;

        let err = client_for(&server).delete(&binding()).await.unwrap_err();
        assert_eq!(err, BrokerError::NotFound);
    }

    #[test]
    fn test_object_paths() {
        let vhost = BrokerObject::new(BrokerKind::Vhost, "", "team a", json!({}));
        assert_eq!(object_path(&vhost), "/api/vhosts/team%20a");

        let schema = BrokerObject::new(
            BrokerKind::SchemaReplication,
            "",
            "schema_definition_sync_upstream",
            json!({}),
        );
        assert_eq!(
            object_path(&schema),
            "/api/global-parameters/schema_definition_sync_upstream"
        );

        let federation = BrokerObject::new(BrokerKind::Federation, "/", "up", json!({}));
        assert_eq!(
            object_path(&federation),
            "/api/parameters/federation-upstream/%2F/up"
        );
    }
}
