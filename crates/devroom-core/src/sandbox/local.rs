//! Process-backed runtime in a throwaway directory on the host.

use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use devroom_types::{CommandSpec, FileNode, FileTree, OutputStream};
use tempfile::TempDir;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::{OutputChunk, ProcessHandle, SandboxProvider, SandboxRuntime, ServerReady, SpawnedProcess};
use crate::error::SandboxError;

const READY_PROBE_INTERVAL: Duration = Duration::from_millis(250);
const OUTPUT_BUFFER: usize = 64;
const READ_CHUNK: usize = 4096;

/// Programs a local sandbox may launch unless configured otherwise.
pub const DEFAULT_PROGRAMS: &[&str] = &["npm", "node"];

/// Boots [`LocalSandbox`]es under `root` (the system temp dir by default).
///
/// Processes run on the host with the server's privileges; only programs in
/// the allowlist can be launched.
#[derive(Debug, Clone)]
pub struct LocalSandboxProvider {
    root: Option<PathBuf>,
    programs: Arc<[String]>,
}

impl LocalSandboxProvider {
    pub fn new(root: Option<PathBuf>) -> Self {
        Self {
            root,
            programs: DEFAULT_PROGRAMS.iter().map(|p| (*p).to_owned()).collect(),
        }
    }

    /// Replace the program allowlist.
    pub fn with_programs<I, S>(mut self, programs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.programs = programs.into_iter().map(Into::into).collect();
        self
    }
}

impl Default for LocalSandboxProvider {
    fn default() -> Self {
        Self::new(None)
    }
}

#[async_trait]
impl SandboxProvider for LocalSandboxProvider {
    async fn boot(&self) -> Result<Box<dyn SandboxRuntime>, SandboxError> {
        let sandbox = LocalSandbox::boot(self.root.as_deref(), Arc::clone(&self.programs)).await?;
        Ok(Box::new(sandbox))
    }
}

/// A temp directory plus a reserved port handed to processes as `PORT`.
///
/// The directory is removed when the sandbox is dropped.
#[derive(Debug)]
pub struct LocalSandbox {
    dir: TempDir,
    port: u16,
    programs: Arc<[String]>,
}

impl LocalSandbox {
    pub async fn boot(root: Option<&Path>, programs: Arc<[String]>) -> Result<Self, SandboxError> {
        let dir = match root {
            Some(root) => {
                tokio::fs::create_dir_all(root).await?;
                tempfile::Builder::new().prefix("devroom-").tempdir_in(root)
            }
            None => tempfile::Builder::new().prefix("devroom-").tempdir(),
        }
        .map_err(|e| SandboxError::Boot(e.to_string()))?;

        let port = free_port().await?;
        info!(dir = %dir.path().display(), port, "sandbox booted");
        Ok(Self { dir, port, programs })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    fn died(&self) -> SandboxError {
        SandboxError::RuntimeDied(format!("{} no longer exists", self.dir.path().display()))
    }

    /// Map a tree path into the sandbox directory.
    fn resolve(&self, path: &str) -> Result<PathBuf, SandboxError> {
        let mut resolved = self.dir.path().to_path_buf();
        let mut depth = 0;
        for component in Path::new(path).components() {
            match component {
                Component::Normal(part) => {
                    resolved.push(part);
                    depth += 1;
                }
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(SandboxError::InvalidPath(path.to_owned()));
                }
            }
        }
        if depth == 0 {
            return Err(SandboxError::InvalidPath(path.to_owned()));
        }
        Ok(resolved)
    }
}

#[async_trait]
impl SandboxRuntime for LocalSandbox {
    async fn mount(&self, tree: &FileTree) -> Result<(), SandboxError> {
        let mut pending: Vec<(String, FileNode)> =
            tree.iter().map(|(path, node)| (path.clone(), node.clone())).collect();

        while let Some((path, node)) = pending.pop() {
            let target = self.resolve(&path)?;
            match node {
                FileNode::File { contents } => {
                    if let Some(parent) = target.parent() {
                        tokio::fs::create_dir_all(parent).await?;
                    }
                    tokio::fs::write(&target, contents).await?;
                }
                FileNode::Directory(children) => {
                    tokio::fs::create_dir_all(&target).await?;
                    for (name, child) in children {
                        let child: FileNode = serde_json::from_value(child)
                            .map_err(|e| SandboxError::Boot(format!("bad entry {path}/{name}: {e}")))?;
                        pending.push((format!("{path}/{name}"), child));
                    }
                }
            }
        }
        debug!(files = tree.len(), "tree mounted");
        Ok(())
    }

    async fn spawn(&self, command: &CommandSpec) -> Result<SpawnedProcess, SandboxError> {
        if !self.programs.iter().any(|p| *p == command.main_item) {
            warn!(program = %command.main_item, "sandbox program refused");
            return Err(SandboxError::CommandNotAllowed(command.main_item.clone()));
        }
        let mut child = Command::new(&command.main_item)
            .args(&command.commands)
            .current_dir(self.dir.path())
            .env("PORT", self.port.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| {
                if self.dir.path().is_dir() {
                    SandboxError::Spawn {
                        command: command.to_string(),
                        source,
                    }
                } else {
                    self.died()
                }
            })?;
        debug!(%command, pid = child.id(), "process spawned");

        let (tx, output) = mpsc::channel(OUTPUT_BUFFER);
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(pump(stdout, OutputStream::Stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(pump(stderr, OutputStream::Stderr, tx));
        }

        Ok(SpawnedProcess {
            output,
            handle: Box::new(LocalProcess { child }),
        })
    }

    async fn ready(&self) -> Result<ServerReady, SandboxError> {
        loop {
            if TcpStream::connect(("127.0.0.1", self.port)).await.is_ok() {
                return Ok(ServerReady {
                    port: self.port,
                    url: format!("http://127.0.0.1:{}", self.port),
                });
            }
            tokio::time::sleep(READY_PROBE_INTERVAL).await;
        }
    }
}

/// A host child process, killed when dropped.
#[derive(Debug)]
pub struct LocalProcess {
    child: Child,
}

#[async_trait]
impl ProcessHandle for LocalProcess {
    async fn wait(&mut self) -> Result<Option<i32>, SandboxError> {
        let status = self.child.wait().await?;
        Ok(status.code())
    }

    async fn kill(&mut self) -> Result<(), SandboxError> {
        self.child.kill().await?;
        Ok(())
    }
}

async fn free_port() -> Result<u16, SandboxError> {
    let listener = TcpListener::bind(("127.0.0.1", 0)).await?;
    Ok(listener.local_addr()?.port())
}

/// Forward `reader` as text. A multi-byte character split across reads is
/// held back until its remaining bytes arrive.
async fn pump<R>(mut reader: R, stream: OutputStream, tx: mpsc::Sender<OutputChunk>)
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; READ_CHUNK];
    let mut pending = Vec::new();
    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        pending.extend_from_slice(&buf[..n]);
        let complete = pending.len() - incomplete_tail(&pending);
        let tail = pending.split_off(complete);
        let data = String::from_utf8_lossy(&pending).into_owned();
        pending = tail;
        if data.is_empty() {
            continue;
        }
        if tx.send(OutputChunk { stream, data }).await.is_err() {
            return;
        }
    }
    if !pending.is_empty() {
        let data = String::from_utf8_lossy(&pending).into_owned();
        let _ = tx.send(OutputChunk { stream, data }).await;
    }
}

/// Length of a UTF-8 sequence cut off at the end of `bytes`.
fn incomplete_tail(bytes: &[u8]) -> usize {
    for back in 1..=bytes.len().min(3) {
        let byte = bytes[bytes.len() - back];
        if byte & 0xC0 == 0x80 {
            continue;
        }
        let width = match byte {
            0xC0..=0xDF => 2,
            0xE0..=0xEF => 3,
            0xF0..=0xF7 => 4,
            _ => 1,
        };
        return if width > back { back } else { 0 };
    }
    0
}
