//! Sandbox execution: boot an isolated runtime, mount the tree, install, start.
//!
//! Each connection has at most one run. Starting a new run aborts the previous
//! one and waits for it to unwind (its processes are killed on drop) before
//! the new run boots.

mod local;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use devroom_types::{CommandSpec, FileTree, OutputStream, ServerEvent};
use strum::Display;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::error::SandboxError;
use crate::room::{ConnectionId, Outbound};

pub use local::{DEFAULT_PROGRAMS, LocalProcess, LocalSandbox, LocalSandboxProvider};

/// How long to keep forwarding output after a process exits.
const DRAIN_GRACE: Duration = Duration::from_secs(1);

/// A piece of process output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputChunk {
    pub stream: OutputStream,
    pub data: String,
}

/// Where the started server can be reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerReady {
    pub port: u16,
    pub url: String,
}

/// Creates fresh isolated runtimes.
#[async_trait]
pub trait SandboxProvider: Send + Sync + 'static {
    async fn boot(&self) -> Result<Box<dyn SandboxRuntime>, SandboxError>;
}

/// Provider for servers that must not execute project code. Every run fails
/// at boot.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledSandboxProvider;

#[async_trait]
impl SandboxProvider for DisabledSandboxProvider {
    async fn boot(&self) -> Result<Box<dyn SandboxRuntime>, SandboxError> {
        Err(SandboxError::Disabled)
    }
}

/// One isolated runtime. Dropping it tears it down.
#[async_trait]
pub trait SandboxRuntime: Send + Sync {
    async fn mount(&self, tree: &FileTree) -> Result<(), SandboxError>;

    async fn spawn(&self, command: &CommandSpec) -> Result<SpawnedProcess, SandboxError>;

    /// Resolves once a server inside the runtime accepts connections.
    async fn ready(&self) -> Result<ServerReady, SandboxError>;
}

/// Control over a spawned process. Dropping the handle kills the process.
#[async_trait]
pub trait ProcessHandle: Send {
    /// Exit code, `None` if terminated by a signal.
    async fn wait(&mut self) -> Result<Option<i32>, SandboxError>;

    async fn kill(&mut self) -> Result<(), SandboxError>;
}

pub struct SpawnedProcess {
    pub output: mpsc::Receiver<OutputChunk>,
    pub handle: Box<dyn ProcessHandle>,
}

/// Phase of a run, reported in `sandbox-error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum SandboxStep {
    Boot,
    Mount,
    Install,
    Start,
}

type StepError = (SandboxStep, SandboxError);

/// Tracks the current run of every connection.
pub struct SandboxController {
    provider: Arc<dyn SandboxProvider>,
    runs: HashMap<ConnectionId, JoinHandle<()>>,
}

impl SandboxController {
    pub fn new(provider: Arc<dyn SandboxProvider>) -> Self {
        Self {
            provider,
            runs: HashMap::new(),
        }
    }

    /// Start a run for `connection`, superseding its previous one. Progress
    /// goes to `outbound` only.
    pub fn run(
        &mut self,
        connection: ConnectionId,
        tree: Arc<FileTree>,
        install: CommandSpec,
        start: CommandSpec,
        outbound: Outbound,
    ) {
        self.runs.retain(|_, run| !run.is_finished());
        let previous = self.runs.remove(&connection);
        let provider = Arc::clone(&self.provider);

        let span = info_span!("sandbox_run", %connection);
        let run = tokio::spawn(
            async move {
                if let Some(previous) = previous {
                    previous.abort();
                    let _ = previous.await;
                    debug!("previous run terminated");
                }
                let event = match execute(provider.as_ref(), &tree, &install, &start, &outbound).await {
                    Ok(code) => {
                        info!(?code, "sandbox process exited");
                        ServerEvent::SandboxExit { code }
                    }
                    Err((step, e)) => {
                        warn!(%step, error = %e, "sandbox run failed");
                        ServerEvent::SandboxError {
                            step: step.to_string(),
                            message: e.to_string(),
                        }
                    }
                };
                let _ = outbound.send(event);
            }
            .instrument(span),
        );
        self.runs.insert(connection, run);
    }

    /// Abort the run of `connection`, if any.
    pub fn cancel(&mut self, connection: ConnectionId) {
        if let Some(run) = self.runs.remove(&connection) {
            run.abort();
            debug!(%connection, "sandbox run cancelled");
        }
    }

    #[cfg(test)]
    pub fn active(&self) -> usize {
        self.runs.values().filter(|run| !run.is_finished()).count()
    }
}

impl Drop for SandboxController {
    fn drop(&mut self) {
        for run in self.runs.values() {
            run.abort();
        }
    }
}

async fn execute(
    provider: &dyn SandboxProvider,
    tree: &FileTree,
    install: &CommandSpec,
    start: &CommandSpec,
    outbound: &Outbound,
) -> Result<Option<i32>, StepError> {
    let runtime = provider.boot().await.map_err(|e| (SandboxStep::Boot, e))?;
    runtime.mount(tree).await.map_err(|e| (SandboxStep::Mount, e))?;

    let mut process = runtime
        .spawn(install)
        .await
        .map_err(|e| (SandboxStep::Install, e))?;
    let code = loop {
        tokio::select! {
            biased;
            Some(chunk) = process.output.recv() => forward(outbound, chunk),
            status = process.handle.wait() => break status.map_err(|e| (SandboxStep::Install, e))?,
        }
    };
    drain(&mut process.output, outbound).await;
    drop(process);
    if code != Some(0) {
        return Err((
            SandboxStep::Install,
            SandboxError::NonZeroExit {
                command: install.to_string(),
                code,
            },
        ));
    }

    let mut process = runtime
        .spawn(start)
        .await
        .map_err(|e| (SandboxStep::Start, e))?;
    let ready = runtime.ready();
    tokio::pin!(ready);
    let mut announced = false;
    let status = loop {
        tokio::select! {
            biased;
            Some(chunk) = process.output.recv() => forward(outbound, chunk),
            result = &mut ready, if !announced => {
                announced = true;
                let ServerReady { port, url } = match result {
                    Ok(ready) => ready,
                    Err(e) => {
                        if let Err(kill) = process.handle.kill().await {
                            debug!(error = %kill, "kill after failed readiness");
                        }
                        return Err((SandboxStep::Start, e));
                    }
                };
                info!(port, %url, "sandbox server ready");
                let _ = outbound.send(ServerEvent::SandboxReady { port, url });
            }
            status = process.handle.wait() => break status,
        }
    };
    drain(&mut process.output, outbound).await;
    let code = status.map_err(|e| (SandboxStep::Start, e))?;
    if !announced && code != Some(0) {
        return Err((
            SandboxStep::Start,
            SandboxError::NonZeroExit {
                command: start.to_string(),
                code,
            },
        ));
    }
    Ok(code)
}

fn forward(outbound: &Outbound, chunk: OutputChunk) {
    let _ = outbound.send(ServerEvent::SandboxOutput {
        stream: chunk.stream,
        chunk: chunk.data,
    });
}

/// Forward what is still buffered after exit.
async fn drain(output: &mut mpsc::Receiver<OutputChunk>, outbound: &Outbound) {
    let _ = tokio::time::timeout(DRAIN_GRACE, async {
        while let Some(chunk) = output.recv().await {
            forward(outbound, chunk);
        }
    })
    .await;
}
