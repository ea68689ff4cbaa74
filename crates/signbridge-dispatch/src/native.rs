//! Process-backed agent channels located through host manifests.
//!
//! A host manifest lives at `<dir>/<name>.json` and names the executable to
//! launch. The relay talks to the launched process over its stdin/stdout using
//! native-messaging frames. The process's stderr is inherited.

use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, instrument, warn};

use crate::channel::{AgentChannel, AgentConnector, AgentPort, ChannelError, ConnectError, EventSink};
use crate::frame::{encode_frame, read_frame};

pub const STDIO_TRANSPORT: &str = "stdio";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostManifest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub path: PathBuf,
    #[serde(rename = "type")]
    pub transport: String,
    /// Recorded for the browser-side manifest format only. Connecting never
    /// reads it; caller origins are checked by the relay's origin policy.
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

impl HostManifest {
    pub fn stdio(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            path: path.into(),
            transport: STDIO_TRANSPORT.to_owned(),
            allowed_origins: Vec::new(),
        }
    }
}

/// Host names are dotted identifiers such as `com.ase.signer`.
pub fn is_valid_host_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && !name.ends_with('.')
        && !name.contains("..")
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '.' || c == '_')
}

/// Directory of host manifests.
#[derive(Debug, Clone)]
pub struct HostRegistry {
    dir: PathBuf,
}

impl HostRegistry {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn manifest_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.json"))
    }

    pub async fn lookup(&self, name: &str) -> Result<HostManifest, ConnectError> {
        if !is_valid_host_name(name) {
            return Err(ConnectError::InvalidName {
                name: name.to_owned(),
            });
        }
        let path = self.manifest_path(name);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(error) if error.kind() == io::ErrorKind::NotFound => {
                return Err(ConnectError::NotRegistered {
                    name: name.to_owned(),
                });
            }
            Err(source) => return Err(ConnectError::ManifestRead { path, source }),
        };
        let manifest: HostManifest = serde_json::from_slice(&bytes)
            .map_err(|source| ConnectError::ManifestInvalid { path, source })?;
        if manifest.name != name {
            return Err(ConnectError::NotRegistered {
                name: name.to_owned(),
            });
        }
        Ok(manifest)
    }

    pub async fn install(&self, manifest: &HostManifest) -> io::Result<PathBuf> {
        if !is_valid_host_name(&manifest.name) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid host name '{}'", manifest.name),
            ));
        }
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.manifest_path(&manifest.name);
        let body = serde_json::to_vec_pretty(manifest).map_err(io::Error::other)?;
        tokio::fs::write(&path, body).await?;
        Ok(path)
    }

    /// Removes the manifest; `false` if none was registered.
    pub async fn uninstall(&self, name: &str) -> io::Result<bool> {
        if !is_valid_host_name(name) {
            return Ok(false);
        }
        match tokio::fs::remove_file(self.manifest_path(name)).await {
            Ok(()) => Ok(true),
            Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(error) => Err(error),
        }
    }
}

/// Launches the registered executable for each connection.
#[derive(Debug, Clone)]
pub struct ProcessConnector {
    hosts: HostRegistry,
}

impl ProcessConnector {
    pub fn new(hosts: HostRegistry) -> Self {
        Self { hosts }
    }

    pub fn hosts(&self) -> &HostRegistry {
        &self.hosts
    }
}

#[async_trait]
impl AgentConnector for ProcessConnector {
    #[instrument(skip(self), fields(dir = ?self.hosts.dir))]
    async fn connect(&self, agent: &str) -> Result<AgentChannel, ConnectError> {
        let manifest = self.hosts.lookup(agent).await?;
        if manifest.transport != STDIO_TRANSPORT {
            return Err(ConnectError::UnsupportedTransport {
                name: manifest.name,
                kind: manifest.transport,
            });
        }

        let mut child = Command::new(&manifest.path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ConnectError::Spawn {
                path: manifest.path.clone(),
                source,
            })?;
        let pid = child.id();
        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            return Err(ConnectError::Spawn {
                path: manifest.path,
                source: io::Error::other("child stdio was not captured"),
            });
        };
        debug!(?pid, path = ?manifest.path, "agent process started");

        let (sink, events) = EventSink::new();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (kill_tx, kill_rx) = oneshot::channel();

        tokio::spawn(write_loop(stdin, outbound_rx, sink.clone()));
        tokio::spawn(read_loop(stdout, sink.clone()));
        tokio::spawn(supervise(child, kill_rx, sink.clone()));

        Ok(AgentChannel {
            port: Arc::new(ProcessPort {
                outbound: outbound_tx,
                kill: Mutex::new(Some(kill_tx)),
                sink,
            }),
            events,
        })
    }
}

#[derive(Debug)]
struct ProcessPort {
    outbound: mpsc::UnboundedSender<Bytes>,
    kill: Mutex<Option<oneshot::Sender<()>>>,
    sink: EventSink,
}

impl AgentPort for ProcessPort {
    fn post_message(&self, payload: Bytes) -> Result<(), ChannelError> {
        if self.sink.is_closed() {
            return Err(ChannelError::Closed);
        }
        let frame = encode_frame(&payload)?;
        self.outbound
            .send(frame)
            .map_err(|_| ChannelError::Closed)
    }

    fn disconnect(&self) {
        if let Some(kill) = self.kill.lock().take() {
            let _ = kill.send(());
        }
    }
}

async fn write_loop(
    mut stdin: ChildStdin,
    mut outbound: mpsc::UnboundedReceiver<Bytes>,
    sink: EventSink,
) {
    while let Some(frame) = outbound.recv().await {
        let written = async {
            stdin.write_all(&frame).await?;
            stdin.flush().await
        }
        .await;
        if let Err(error) = written {
            warn!(%error, "write to agent failed");
            sink.close(format!("write to agent failed: {error}"));
            return;
        }
    }
}

async fn read_loop(mut stdout: ChildStdout, sink: EventSink) {
    loop {
        match read_frame(&mut stdout).await {
            Ok(Some(body)) => match serde_json::from_slice(&body) {
                Ok(message) => sink.message(message),
                Err(error) => warn!(%error, "dropping non-JSON frame from agent"),
            },
            Ok(None) => {
                sink.close("agent closed its output");
                return;
            }
            Err(error) => {
                sink.close(format!("invalid frame from agent: {error}"));
                return;
            }
        }
    }
}

async fn supervise(mut child: Child, kill: oneshot::Receiver<()>, sink: EventSink) {
    tokio::select! {
        status = child.wait() => {
            let reason = match status {
                Ok(status) => format!("agent exited with {status}"),
                Err(error) => format!("failed to wait for agent: {error}"),
            };
            info!(%reason, "agent process ended");
            sink.close(reason);
        }
        _ = kill => {
            if let Err(error) = child.kill().await {
                warn!(%error, "failed to terminate agent process");
            }
            sink.close("disconnected by relay");
        }
    }
}
