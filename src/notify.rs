use std::io;
use std::process::Stdio;
use std::sync::Arc;

use log::{debug, warn};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;

use crate::config::NotifyCommand;

/// Starts an external process without waiting for it.
pub trait ProcessLauncher: Send + Sync {
    fn launch(&self, command: &NotifyCommand) -> io::Result<()>;
}

pub struct TokioLauncher;

impl ProcessLauncher for TokioLauncher {
    fn launch(&self, command: &NotifyCommand) -> io::Result<()> {
        let mut child = Command::new(&command.path)
            .args(&command.args)
            .env_clear()
            .envs(&command.env)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;

        // reap in the background, nobody waits on the result
        let path = command.path.clone();
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) => debug!("{} exited with {status}", path.display()),
                Err(e) => warn!("wait for {} failed: {e}", path.display()),
            }
        });
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct NotifyRequest {
    pub source: Arc<str>,
    pub command: Arc<NotifyCommand>,
}

/// Sending half handed to dispatchers. Submitting never blocks.
#[derive(Clone)]
pub struct NotifyQueue {
    tx: mpsc::Sender<NotifyRequest>,
}

impl NotifyQueue {
    pub fn submit(&self, request: NotifyRequest) {
        match self.tx.try_send(request) {
            Ok(()) => {}
            Err(TrySendError::Full(req)) => {
                warn!(
                    "{}: notification queue full, dropping {}",
                    req.source,
                    req.command.path.display()
                );
            }
            Err(TrySendError::Closed(req)) => {
                warn!(
                    "{}: notification worker gone, dropping {}",
                    req.source,
                    req.command.path.display()
                );
            }
        }
    }
}

/// Creates a bounded queue and the task draining it. Must be called inside a
/// tokio runtime. The task exits once every `NotifyQueue` clone is dropped.
pub fn spawn_worker(
    capacity: usize,
    launcher: Arc<dyn ProcessLauncher>,
) -> (NotifyQueue, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let handle = tokio::spawn(run_worker(rx, launcher));
    (NotifyQueue { tx }, handle)
}

async fn run_worker(mut rx: mpsc::Receiver<NotifyRequest>, launcher: Arc<dyn ProcessLauncher>) {
    while let Some(req) = rx.recv().await {
        debug!("{}: launching {}", req.source, req.command.path.display());
        if let Err(e) = launcher.launch(&req.command) {
            warn!(
                "{}: failed to launch {}: {e}",
                req.source,
                req.command.path.display()
            );
        }
    }
    debug!("notification worker stopped");
}
