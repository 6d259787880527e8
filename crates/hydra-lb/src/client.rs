//! HAProxy admin socket client.

use std::io;
use std::net::IpAddr;
use std::path::{Path, PathBuf};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tracing::{debug, info, warn};

use hydra_core::slot_name;

use crate::error::LbResult;
use crate::stat::{StatRow, parse_report};

/// Default admin socket path inside the controller container.
pub const DEFAULT_SOCKET_PATH: &str = "/var/run/haproxy/admin.sock";

/// Issues administrative commands to the load balancer.
///
/// Every command opens a fresh connection; nothing is pooled.
#[derive(Debug, Clone)]
pub struct HaproxyClient {
    socket_path: PathBuf,
}

impl HaproxyClient {
    pub fn new(socket_path: impl AsRef<Path>) -> Self {
        Self {
            socket_path: socket_path.as_ref().to_path_buf(),
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Send one command line and return the full decoded response.
    pub async fn send(&self, command: &str) -> LbResult<String> {
        let mut stream = UnixStream::connect(&self.socket_path).await?;
        stream.write_all(format!("{command}\n").as_bytes()).await?;

        let mut buf = Vec::new();
        stream.read_to_end(&mut buf).await?;

        let text = String::from_utf8(buf).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        debug!(%command, bytes = text.len(), "load balancer command sent");
        Ok(text)
    }

    /// Node slots of the backend named `alias`.
    pub async fn backend_nodes(&self, alias: &str) -> LbResult<Vec<StatRow>> {
        let report = self.send("show stat").await?;
        Ok(parse_report(&report)
            .into_iter()
            .filter(|row| row.is_node_slot() && row.pxname() == alias)
            .collect())
    }

    /// Node slots of `alias` that are in `MAINT`, i.e. unbound.
    pub async fn free_nodes(&self, alias: &str) -> LbResult<Vec<StatRow>> {
        Ok(self
            .backend_nodes(alias)
            .await?
            .into_iter()
            .filter(StatRow::is_maint)
            .collect())
    }

    /// The free slot named `slot` in backend `alias`, if it is free.
    pub async fn free_node(&self, alias: &str, slot: &str) -> LbResult<Option<StatRow>> {
        Ok(self
            .free_nodes(alias)
            .await?
            .into_iter()
            .find(|row| row.svname() == slot))
    }

    /// Bind the node's slot in backend `alias` to `addr:port` and put it in rotation.
    ///
    /// The two commands are not atomic. If the second fails the slot keeps
    /// its new address but stays out of rotation; nothing is rolled back.
    pub async fn register_service(
        &self,
        alias: &str,
        node_name: &str,
        addr: IpAddr,
        port: u16,
    ) -> LbResult<()> {
        let slot = slot_name(node_name)?;

        let res = self
            .send(&format!("set server {alias}/{slot} addr {addr} port {port}"))
            .await?;
        log_response(alias, &slot, "addr", &res);

        let res = self
            .send(&format!("set server {alias}/{slot} state ready"))
            .await?;
        log_response(alias, &slot, "ready", &res);

        Ok(())
    }

    /// Take the node's slot in backend `alias` out of rotation.
    pub async fn release_slot(&self, alias: &str, node_name: &str) -> LbResult<()> {
        let slot = slot_name(node_name)?;
        let res = self
            .send(&format!("set server {alias}/{slot} state maint"))
            .await?;
        log_response(alias, &slot, "maint", &res);
        Ok(())
    }
}

fn log_response(alias: &str, slot: &str, step: &str, response: &str) {
    let response = response.trim();
    if response.starts_with("No such") {
        warn!(%alias, %slot, step, %response, "load balancer rejected command");
    } else {
        info!(%alias, %slot, step, %response, "load balancer updated");
    }
}
