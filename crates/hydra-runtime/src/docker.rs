//! Docker Engine API client over the daemon's UNIX socket.
//!
//! Each request opens its own connection: HTTP/1.1 handshake over
//! `UnixStream`, connection driven by a spawned task, response body
//! collected in full. The event stream is the exception; its connection
//! stays open until the subscriber goes away.

use std::collections::HashMap;
use std::net::IpAddr;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use http::{Method, Request, Response, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper_util::rt::TokioIo;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use tokio::net::UnixStream;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::ContainerRuntime;
use crate::error::{RuntimeError, RuntimeResult};
use crate::types::*;

/// Default Docker daemon socket.
pub const DEFAULT_SOCKET_PATH: &str = "/var/run/docker.sock";

const API_VERSION: &str = "v1.43";

/// Buffered events per subscription before the reader waits.
const EVENT_BUFFER: usize = 16;

/// Docker Engine API client.
#[derive(Debug, Clone)]
pub struct DockerClient {
    socket_path: PathBuf,
}

impl DockerClient {
    pub fn new(socket_path: impl AsRef<Path>) -> Self {
        Self {
            socket_path: socket_path.as_ref().to_path_buf(),
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> RuntimeResult<Response<Incoming>> {
        let stream = UnixStream::connect(&self.socket_path).await.map_err(|e| {
            RuntimeError::Connect(format!("{}: {e}", self.socket_path.display()))
        })?;

        let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(stream))
            .await
            .map_err(|e| RuntimeError::Http(e.to_string()))?;

        tokio::spawn(async move {
            if let Err(e) = conn.await {
                debug!(error = %e, "docker connection closed");
            }
        });

        let payload = match body {
            Some(value) => {
                serde_json::to_vec(&value).map_err(|e| RuntimeError::Http(e.to_string()))?
            }
            None => Vec::new(),
        };

        let request = Request::builder()
            .method(method)
            .uri(format!("http://localhost/{API_VERSION}{path}"))
            .header("host", "localhost")
            .header("content-type", "application/json")
            .header("user-agent", "hydra/0.1")
            .body(Full::new(Bytes::from(payload)))
            .map_err(|e| RuntimeError::Http(e.to_string()))?;

        sender
            .send_request(request)
            .await
            .map_err(|e| RuntimeError::Http(e.to_string()))
    }

    /// Send a request and collect the body, mapping error statuses.
    async fn call(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> RuntimeResult<Bytes> {
        let response = self.send(method, path, body).await?;
        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .map_err(|e| RuntimeError::Http(e.to_string()))?
            .to_bytes();
        check_status(status, &bytes)?;
        Ok(bytes)
    }

    async fn call_json<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> RuntimeResult<T> {
        let bytes = self.call(method, path, body).await?;
        serde_json::from_slice(&bytes).map_err(|e| RuntimeError::Decode(e.to_string()))
    }
}

impl ContainerRuntime for DockerClient {
    async fn list_containers(&self, network: &str) -> RuntimeResult<Vec<ContainerInfo>> {
        let filters = json!({ "network": [network] }).to_string();
        let path = format!("/containers/json?filters={}", encode_component(&filters));
        let summaries: Vec<ContainerSummary> = self.call_json(Method::GET, &path, None).await?;
        Ok(summaries.into_iter().map(ContainerInfo::from).collect())
    }

    async fn inspect_container(&self, name: &str) -> RuntimeResult<ContainerInfo> {
        let path = format!("/containers/{}/json", encode_component(name));
        let inspect: ContainerInspect = self.call_json(Method::GET, &path, None).await?;
        Ok(inspect.into())
    }

    async fn run_container(&self, spec: &RunSpec) -> RuntimeResult<ContainerInfo> {
        let body = json!({
            "Image": spec.image,
            "Hostname": spec.hostname,
            "Tty": spec.tty,
            "OpenStdin": spec.stdin_open,
            "AttachStdin": !spec.detach && spec.stdin_open,
            "AttachStdout": !spec.detach,
            "AttachStderr": !spec.detach,
            "HostConfig": {
                "Privileged": spec.privileged,
                "AutoRemove": spec.auto_remove,
                "NetworkMode": spec.network,
            },
        });
        let path = format!("/containers/create?name={}", encode_component(&spec.name));
        let created: IdResponse = self.call_json(Method::POST, &path, Some(body)).await?;

        self.call(Method::POST, &format!("/containers/{}/start", created.id), None)
            .await?;
        debug!(name = %spec.name, id = %created.id, "container started");

        self.inspect_container(&created.id).await
    }

    async fn exec(&self, container: &str, cmd: &[String]) -> RuntimeResult<ExecOutput> {
        let body = json!({
            "Cmd": cmd,
            "AttachStdout": true,
            "AttachStderr": true,
            "Tty": true,
        });
        let path = format!("/containers/{}/exec", encode_component(container));
        let created: IdResponse = self.call_json(Method::POST, &path, Some(body)).await?;

        // With a TTY the output is a raw stream, not the multiplexed framing.
        let output = self
            .call(
                Method::POST,
                &format!("/exec/{}/start", created.id),
                Some(json!({ "Detach": false, "Tty": true })),
            )
            .await?;

        let inspect: ExecInspect = self
            .call_json(Method::GET, &format!("/exec/{}/json", created.id), None)
            .await?;

        Ok(ExecOutput {
            exit_code: inspect.exit_code.unwrap_or(-1),
            output: String::from_utf8_lossy(&output).into_owned(),
        })
    }

    async fn subscribe(&self, filter: &EventFilter) -> RuntimeResult<EventSubscription> {
        let filters = json!({
            "type": ["container"],
            "container": [filter.container],
            "event": filter.actions,
        })
        .to_string();
        let path = format!("/events?filters={}", encode_component(&filters));

        let response = self.send(Method::GET, &path, None).await?;
        let status = response.status();
        if !status.is_success() {
            let bytes = response
                .into_body()
                .collect()
                .await
                .map_err(|e| RuntimeError::Http(e.to_string()))?
                .to_bytes();
            return Err(status_error(status, &bytes));
        }

        let (tx, subscription) = EventSubscription::channel(EVENT_BUFFER);
        let filter = filter.clone();
        tokio::spawn(forward_events(response.into_body(), filter, tx));
        Ok(subscription)
    }
}

/// Pump newline-delimited JSON events into the subscription until either
/// side goes away.
async fn forward_events(mut body: Incoming, filter: EventFilter, tx: mpsc::Sender<RuntimeEvent>) {
    let mut buf: Vec<u8> = Vec::new();
    loop {
        tokio::select! {
            _ = tx.closed() => {
                debug!(container = %filter.container, "event subscription cancelled");
                return;
            }
            frame = body.frame() => {
                let Some(frame) = frame else {
                    debug!(container = %filter.container, "event stream ended");
                    return;
                };
                let frame = match frame {
                    Ok(f) => f,
                    Err(e) => {
                        warn!(container = %filter.container, error = %e, "event stream failed");
                        return;
                    }
                };
                let Ok(data) = frame.into_data() else { continue };
                buf.extend_from_slice(&data);

                while let Some(pos) = buf.iter().position(|b| *b == b'\n') {
                    let line: Vec<u8> = buf.drain(..=pos).collect();
                    let event = match serde_json::from_slice::<DockerEvent>(&line) {
                        Ok(e) => RuntimeEvent::from(e),
                        Err(e) => {
                            debug!(error = %e, "skipping undecodable event");
                            continue;
                        }
                    };
                    // The daemon filters too; this guards against loose name matching.
                    if filter.matches(&event) && tx.send(event).await.is_err() {
                        return;
                    }
                }
            }
        }
    }
}

fn check_status(status: StatusCode, body: &[u8]) -> RuntimeResult<()> {
    if status.is_success() {
        Ok(())
    } else {
        Err(status_error(status, body))
    }
}

fn status_error(status: StatusCode, body: &[u8]) -> RuntimeError {
    let message = serde_json::from_slice::<ErrorResponse>(body)
        .map(|e| e.message)
        .unwrap_or_else(|_| String::from_utf8_lossy(body).into_owned());
    if status == StatusCode::NOT_FOUND {
        RuntimeError::NotFound(message)
    } else {
        RuntimeError::Api {
            status: status.as_u16(),
            message,
        }
    }
}

/// Percent-encode a query or path component.
fn encode_component(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                out.push(b as char)
            }
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}

// ── Wire types ──────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct IdResponse {
    id: String,
}

#[derive(Deserialize)]
struct ErrorResponse {
    message: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ExecInspect {
    exit_code: Option<i64>,
}

#[derive(Deserialize, Default)]
struct EndpointSettings {
    #[serde(rename = "IPAddress", default)]
    ip_address: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PortBinding {
    #[serde(default)]
    host_ip: String,
    #[serde(default)]
    host_port: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ContainerSummary {
    id: String,
    #[serde(default)]
    names: Vec<String>,
    #[serde(default)]
    image: String,
    #[serde(default)]
    state: String,
    #[serde(default)]
    network_settings: Option<SummaryNetworkSettings>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "PascalCase")]
struct SummaryNetworkSettings {
    #[serde(default)]
    networks: HashMap<String, EndpointSettings>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ContainerInspect {
    id: String,
    name: String,
    config: InspectConfig,
    state: InspectState,
    network_settings: InspectNetworkSettings,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectConfig {
    #[serde(default)]
    image: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectState {
    #[serde(default)]
    status: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectNetworkSettings {
    #[serde(default)]
    networks: HashMap<String, EndpointSettings>,
    #[serde(default)]
    ports: HashMap<String, Option<Vec<PortBinding>>>,
}

#[derive(Deserialize)]
struct DockerEvent {
    #[serde(rename = "Action", default)]
    action: String,
    #[serde(rename = "Actor", default)]
    actor: EventActor,
    #[serde(default)]
    time: i64,
}

#[derive(Deserialize, Default)]
struct EventActor {
    #[serde(rename = "Attributes", default)]
    attributes: HashMap<String, String>,
}

fn parse_networks(networks: HashMap<String, EndpointSettings>) -> HashMap<String, Option<IpAddr>> {
    networks
        .into_iter()
        .map(|(name, ep)| (name, ep.ip_address.parse().ok()))
        .collect()
}

impl From<ContainerSummary> for ContainerInfo {
    fn from(s: ContainerSummary) -> Self {
        let name = s
            .names
            .first()
            .map(|n| n.trim_start_matches('/').to_string())
            .unwrap_or_default();
        Self {
            id: s.id,
            name,
            image: s.image,
            state: s.state,
            networks: parse_networks(s.network_settings.unwrap_or_default().networks),
            ports: HashMap::new(),
        }
    }
}

impl From<ContainerInspect> for ContainerInfo {
    fn from(c: ContainerInspect) -> Self {
        let ports = c
            .network_settings
            .ports
            .into_iter()
            .map(|(port, bindings)| {
                let bindings = bindings
                    .unwrap_or_default()
                    .into_iter()
                    .filter_map(|b| {
                        Some(PublishedPort {
                            host_ip: b.host_ip,
                            host_port: b.host_port.parse().ok()?,
                        })
                    })
                    .collect();
                (port, bindings)
            })
            .collect();
        Self {
            id: c.id,
            name: c.name.trim_start_matches('/').to_string(),
            image: c.config.image,
            state: c.state.status,
            networks: parse_networks(c.network_settings.networks),
            ports,
        }
    }
}

impl From<DockerEvent> for RuntimeEvent {
    fn from(e: DockerEvent) -> Self {
        Self {
            container: e.actor.attributes.get("name").cloned().unwrap_or_default(),
            action: e.action,
            time: e.time,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::UnixListener;

    #[test]
    fn encode_component_escapes_json() {
        assert_eq!(
            encode_component(r#"{"network":["test"]}"#),
            "%7B%22network%22%3A%5B%22test%22%5D%7D"
        );
        assert_eq!(encode_component("node-1.test"), "node-1.test");
    }

    #[test]
    fn inspect_maps_networks_and_ports() {
        let raw = r#"{
            "Id": "abc123",
            "Name": "/haproxy.test",
            "Config": {"Image": "hydra-haproxy"},
            "State": {"Status": "running"},
            "NetworkSettings": {
                "Networks": {"test": {"IPAddress": "172.18.0.3"}},
                "Ports": {
                    "8888/tcp": [{"HostIp": "0.0.0.0", "HostPort": "32770"}],
                    "9999/tcp": null
                }
            }
        }"#;
        let inspect: ContainerInspect = serde_json::from_str(raw).unwrap();
        let info = ContainerInfo::from(inspect);

        assert_eq!(info.name, "haproxy.test");
        assert_eq!(info.state, "running");
        assert_eq!(info.address_on("test"), Some("172.18.0.3".parse().unwrap()));
        let port = info.published_tcp(8888).unwrap();
        assert_eq!(port.host_ip, "0.0.0.0");
        assert_eq!(port.host_port, 32770);
        assert!(info.published_tcp(9999).is_none());
    }

    #[test]
    fn summary_without_address_maps_to_none() {
        let raw = r#"{
            "Id": "def456",
            "Names": ["/node-1.test"],
            "Image": "docker:dind",
            "State": "created",
            "NetworkSettings": {"Networks": {"test": {"IPAddress": ""}}}
        }"#;
        let summary: ContainerSummary = serde_json::from_str(raw).unwrap();
        let info = ContainerInfo::from(summary);
        assert_eq!(info.name, "node-1.test");
        assert!(info.networks.contains_key("test"));
        assert_eq!(info.address_on("test"), None);
    }

    #[test]
    fn event_maps_actor_name() {
        let raw = r#"{"Type":"container","Action":"die","Actor":{"ID":"abc","Attributes":{"name":"node-2.test","image":"docker:dind"}},"time":1700000000}"#;
        let event = RuntimeEvent::from(serde_json::from_str::<DockerEvent>(raw).unwrap());
        assert_eq!(event.container, "node-2.test");
        assert_eq!(event.action, "die");
        assert_eq!(event.time, 1_700_000_000);
    }

    #[test]
    fn not_found_status_maps_to_not_found() {
        let err = check_status(StatusCode::NOT_FOUND, br#"{"message":"No such container: x"}"#)
            .unwrap_err();
        assert!(matches!(err, RuntimeError::NotFound(m) if m == "No such container: x"));

        let err = check_status(StatusCode::CONFLICT, b"name in use").unwrap_err();
        assert!(matches!(err, RuntimeError::Api { status: 409, .. }));
    }

    /// Minimal daemon: answers one request per connection with a fixed response.
    fn fake_daemon(dir: &tempfile::TempDir, response: &'static str) -> PathBuf {
        let path = dir.path().join("docker.sock");
        let listener = UnixListener::bind(&path).unwrap();
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                let mut buf = [0u8; 4096];
                let _ = stream.read(&mut buf).await;
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.shutdown().await;
            }
        });
        path
    }

    #[tokio::test]
    async fn inspect_missing_container_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let body = r#"{"message":"No such container: ghost"}"#;
        let response: &'static str = Box::leak(
            format!(
                "HTTP/1.1 404 Not Found\r\ncontent-type: application/json\r\ncontent-length: {}\r\n\r\n{}",
                body.len(),
                body
            )
            .into_boxed_str(),
        );
        let client = DockerClient::new(fake_daemon(&dir, response));

        let err = client.inspect_container("ghost").await.unwrap_err();
        assert!(matches!(err, RuntimeError::NotFound(_)));
    }

    #[tokio::test]
    async fn rejected_event_subscription_is_api_error() {
        let dir = tempfile::tempdir().unwrap();
        let body = r#"{"message":"invalid filter 'event=boom'"}"#;
        let response: &'static str = Box::leak(
            format!(
                "HTTP/1.1 400 Bad Request\r\ncontent-type: application/json\r\ncontent-length: {}\r\n\r\n{}",
                body.len(),
                body
            )
            .into_boxed_str(),
        );
        let client = DockerClient::new(fake_daemon(&dir, response));

        let filter = EventFilter::new("node-1.test", &["boom".to_string()]);
        let Err(err) = client.subscribe(&filter).await else {
            panic!("subscription to a rejected filter succeeded");
        };
        assert!(
            matches!(err, RuntimeError::Api { status: 400, ref message } if message.contains("invalid filter"))
        );
    }

    #[tokio::test]
    async fn unreachable_daemon_is_connect_error() {
        let dir = tempfile::tempdir().unwrap();
        let client = DockerClient::new(dir.path().join("nothing.sock"));
        let err = client.list_containers("test").await.unwrap_err();
        assert!(matches!(err, RuntimeError::Connect(_)));
    }
}
