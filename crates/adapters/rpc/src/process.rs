//! Child-process bridges.
//!
//! The child speaks RPC on its stdin/stdout. A scheduler task keeps it
//! running: a clean exit restarts it after a fixed delay, a failure to start
//! or a broken channel restarts it with backoff.

use std::process::Stdio;
use std::sync::{Arc, Weak};
use std::time::Duration;

use hearth_app::provider::Provider;
use hearth_app::scheduler::{Backoff, Task, TaskError, TaskMode};
use hearth_domain::error::HearthError;
use tokio::process::Command;

use crate::bridge::serve_provider;
use crate::error::RpcError;
use crate::peer::PeerOptions;

/// Command line of a bridge process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSpec {
    pub command: String,
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct SupervisorOptions {
    pub peer: PeerOptions,
    pub backoff: Backoff,
    /// Delay before restarting a process that exited cleanly.
    pub restart_delay: Duration,
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self {
            peer: PeerOptions::default(),
            backoff: Backoff::default(),
            restart_delay: Duration::from_secs(1),
        }
    }
}

/// Name of the supervising task on the provider.
#[must_use]
pub fn task_name(provider: &Provider) -> String {
    format!("bridge:{}", provider.id())
}

/// Attach a supervised child process to `provider`.
pub fn supervise(provider: &Arc<Provider>, spec: ProcessSpec, options: SupervisorOptions) {
    let weak: Weak<Provider> = Arc::downgrade(provider);
    let task = Task::spawn(
        task_name(provider),
        TaskMode::Every(options.restart_delay),
        options.backoff,
        move || {
            let weak = weak.clone();
            let spec = spec.clone();
            async move {
                let Some(provider) = weak.upgrade() else {
                    return Ok(());
                };
                run_once(&provider, &spec, options.peer)
                    .await
                    .map_err(|err| TaskError::Failed(HearthError::from(err)))
            }
        },
    );
    provider.add_task(task);
}

/// Start the process and bridge it until its stdout closes.
///
/// # Errors
///
/// Returns [`RpcError::Io`] when the process cannot be started, otherwise
/// whatever closed the channel.
pub async fn run_once(provider: &Arc<Provider>, spec: &ProcessSpec, options: PeerOptions) -> Result<(), RpcError> {
    let mut child = Command::new(&spec.command)
        .args(&spec.args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .kill_on_drop(true)
        .spawn()?;
    let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
        return Err(RpcError::Closed);
    };
    tracing::info!(provider = %provider.id(), command = %spec.command, pid = child.id(), "bridge process started");

    let result = serve_provider(provider, stdout, stdin, options).await;

    if let Err(err) = child.kill().await {
        tracing::debug!(provider = %provider.id(), error = %err, "bridge process already gone");
    }
    match &result {
        Ok(()) => tracing::info!(provider = %provider.id(), "bridge process exited"),
        Err(err) => tracing::warn!(provider = %provider.id(), error = %err, "bridge process failed"),
    }
    result
}
