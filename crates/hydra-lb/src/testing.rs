//! Stub HAProxy admin socket for tests.
//!
//! Serves a real UNIX socket in a temporary directory and keeps an
//! in-memory table of backends and slots. It answers `show stat` with a
//! report in the fixed column order and applies `set server ... addr` and
//! `set server ... state` commands to the table.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};

use crate::stat::{MAINT, STAT_COLUMNS, column_index};

/// A server slot in the stub's table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotState {
    pub backend: String,
    pub slot: String,
    pub status: String,
    pub addr: Option<String>,
}

pub struct StubHaproxy {
    _dir: tempfile::TempDir,
    socket_path: PathBuf,
    slots: Arc<Mutex<Vec<SlotState>>>,
    commands: Arc<Mutex<Vec<String>>>,
}

impl StubHaproxy {
    /// Bind the socket and start serving. Must be called inside a tokio runtime.
    pub fn start() -> std::io::Result<Self> {
        let dir = tempfile::tempdir()?;
        let socket_path = dir.path().join("admin.sock");
        let listener = UnixListener::bind(&socket_path)?;
        let slots = Arc::new(Mutex::new(Vec::new()));
        let commands = Arc::new(Mutex::new(Vec::new()));

        let task_slots = slots.clone();
        let task_commands = commands.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let slots = task_slots.clone();
                let commands = task_commands.clone();
                tokio::spawn(async move {
                    let _ = serve(stream, slots, commands).await;
                });
            }
        });

        Ok(Self {
            _dir: dir,
            socket_path,
            slots,
            commands,
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Provision backend `alias` with `count` free slots `node1..=node<count>`.
    pub fn add_backend(&self, alias: &str, count: u32) {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        for i in 1..=count {
            slots.push(SlotState {
                backend: alias.to_string(),
                slot: format!("node{i}"),
                status: MAINT.to_string(),
                addr: None,
            });
        }
    }

    pub fn slot(&self, alias: &str, slot: &str) -> Option<SlotState> {
        let slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots
            .iter()
            .find(|s| s.backend == alias && s.slot == slot)
            .cloned()
    }

    /// Force a slot's status, e.g. to model a slot bound outside the controller.
    pub fn set_status(&self, alias: &str, slot: &str, status: &str) {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(s) = slots.iter_mut().find(|s| s.backend == alias && s.slot == slot) {
            s.status = status.to_string();
        }
    }

    /// Every command line received, in arrival order.
    pub fn commands(&self) -> Vec<String> {
        self.commands
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Commands that change state (everything except `show stat`).
    pub fn mutations(&self) -> Vec<String> {
        self.commands()
            .into_iter()
            .filter(|c| c.starts_with("set "))
            .collect()
    }
}

async fn serve(
    stream: UnixStream,
    slots: Arc<Mutex<Vec<SlotState>>>,
    commands: Arc<Mutex<Vec<String>>>,
) -> std::io::Result<()> {
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    reader.read_line(&mut line).await?;
    let command = line.trim_end().to_string();
    commands
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .push(command.clone());

    let reply = {
        let mut slots = slots.lock().unwrap_or_else(|e| e.into_inner());
        respond(&command, &mut slots)
    };

    let mut stream = reader.into_inner();
    stream.write_all(reply.as_bytes()).await?;
    stream.shutdown().await
}

fn respond(command: &str, slots: &mut [SlotState]) -> String {
    let words: Vec<&str> = command.split_whitespace().collect();
    match words.as_slice() {
        ["show", "stat"] => render_report(slots),
        ["set", "server", target, rest @ ..] => {
            let Some((backend, slot)) = target.split_once('/') else {
                return "Require 'backend/server'.\n".to_string();
            };
            let Some(state) = slots
                .iter_mut()
                .find(|s| s.backend == backend && s.slot == slot)
            else {
                return "No such server.\n".to_string();
            };
            match rest {
                ["addr", addr, "port", port] => {
                    state.addr = Some(format!("{addr}:{port}"));
                    format!("IP changed to '{addr}', port changed to '{port}' by 'stats socket command'\n")
                }
                ["state", "ready"] => {
                    state.status = "UP".to_string();
                    "\n".to_string()
                }
                ["state", "maint"] => {
                    state.status = MAINT.to_string();
                    "\n".to_string()
                }
                _ => "Unknown command.\n".to_string(),
            }
        }
        _ => "Unknown command.\n".to_string(),
    }
}

fn render_report(slots: &[SlotState]) -> String {
    let mut out = format!("# {},\n", STAT_COLUMNS.join(","));
    let mut backends: Vec<&str> = slots.iter().map(|s| s.backend.as_str()).collect();
    backends.dedup();

    for backend in backends {
        out.push_str(&render_row(backend, "FRONTEND", "OPEN", None));
        for s in slots.iter().filter(|s| s.backend == backend) {
            out.push_str(&render_row(&s.backend, &s.slot, &s.status, s.addr.as_deref()));
        }
        out.push_str(&render_row(backend, "BACKEND", "UP", None));
    }
    out.push('\n');
    out
}

fn render_row(pxname: &str, svname: &str, status: &str, addr: Option<&str>) -> String {
    let mut fields = vec![String::new(); STAT_COLUMNS.len()];
    fields[0] = pxname.to_string();
    fields[1] = svname.to_string();
    if let Some(i) = column_index("status") {
        fields[i] = status.to_string();
    }
    if let (Some(i), Some(addr)) = (column_index("addr"), addr) {
        fields[i] = addr.to_string();
    }
    format!("{},\n", fields.join(","))
}
