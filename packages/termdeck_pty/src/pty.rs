use anyhow::Context;
use portable_pty::{Child, ChildKiller, CommandBuilder, MasterPty, PtySize, native_pty_system};
use std::io::{Read, Write};
use std::sync::{Arc, Mutex, MutexGuard};
use termdeck_protocol::SessionId;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::error::PtyError;
use crate::process::{ProcessEvent, ProcessHandle, ProcessSpawner, SpawnRequest};

/// Configuration for spawning shells
#[derive(Clone, Debug)]
pub struct PtyConfig {
    pub command: String,
    pub args: Vec<String>,
    pub working_dir: Option<String>,
    pub env: Vec<(String, String)>,
}

impl Default for PtyConfig {
    fn default() -> Self {
        Self {
            command: default_shell(),
            args: Vec::new(),
            working_dir: std::env::var("HOME").ok(),
            env: Vec::new(),
        }
    }
}

/// `$SHELL`, falling back to the platform shell.
pub fn default_shell() -> String {
    if cfg!(windows) {
        return "powershell.exe".to_string();
    }
    std::env::var("SHELL")
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "bash".to_string())
}

/// Spawns shells on native pseudo-terminals.
#[derive(Clone, Debug)]
pub struct PtySpawner {
    config: PtyConfig,
}

impl PtySpawner {
    pub fn new(config: PtyConfig) -> Self {
        Self { config }
    }

    fn build_command(&self) -> CommandBuilder {
        let config = &self.config;
        let mut cmd = CommandBuilder::new(&config.command);
        for arg in &config.args {
            cmd.arg(arg);
        }

        if let Some(dir) = &config.working_dir {
            cmd.cwd(dir);
        }

        cmd.env("TERM", "xterm-256color");
        cmd.env("COLORTERM", "truecolor");
        for key in ["PATH", "HOME", "USER", "LANG"] {
            if let Ok(value) = std::env::var(key) {
                cmd.env(key, value);
            }
        }
        for (key, value) in &config.env {
            cmd.env(key, value);
        }
        cmd
    }
}

impl ProcessSpawner for PtySpawner {
    fn spawn(
        &self,
        request: SpawnRequest,
        events: mpsc::Sender<ProcessEvent>,
    ) -> Result<Box<dyn ProcessHandle>, PtyError> {
        let pair = native_pty_system()
            .openpty(PtySize {
                rows: request.rows,
                cols: request.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .context("Failed to open PTY")?;

        // Everything that can fail on the master happens before the child exists.
        let mut reader = pair
            .master
            .try_clone_reader()
            .context("Failed to clone PTY reader")?;
        let writer = pair
            .master
            .take_writer()
            .context("Failed to take PTY writer")?;

        let mut child = pair
            .slave
            .spawn_command(self.build_command())
            .map_err(|e| {
                error!("Failed to spawn command '{}': {}", self.config.command, e);
                PtyError::CreateFailed(e.to_string())
            })?;
        // The child holds its own copy; ours would keep the master from seeing EOF.
        drop(pair.slave);

        let pid = child.process_id();
        let killer = child.clone_killer();
        let reaped = Arc::new(Mutex::new(false));

        let id = request.id;
        let thread_id = id.clone();
        let thread_reaped = reaped.clone();
        // The child is handed over only once the thread is running, so a
        // failed thread start leaves it here to be cleaned up.
        let (child_tx, child_rx) = std::sync::mpsc::sync_channel::<Box<dyn Child + Send + Sync>>(1);
        let started = std::thread::Builder::new()
            .name(format!("pty-reader-{id}"))
            .spawn(move || {
                let mut buffer = vec![0u8; 4096];
                loop {
                    match reader.read(&mut buffer) {
                        Ok(0) => {
                            debug!(session = %thread_id, "PTY EOF");
                            break;
                        }
                        Ok(n) => {
                            let event = ProcessEvent::Output {
                                id: thread_id.clone(),
                                data: buffer[..n].to_vec(),
                            };
                            if events.blocking_send(event).is_err() {
                                debug!(session = %thread_id, "Event receiver dropped");
                                break;
                            }
                        }
                        Err(e) => {
                            // EIO is the normal end-of-session signal on Linux.
                            debug!(session = %thread_id, "PTY read ended: {}", e);
                            break;
                        }
                    }
                }

                let Ok(mut child) = child_rx.recv() else {
                    return;
                };
                // Reaping frees the pid, so it happens under the lock `kill` checks.
                let exit_code = {
                    let mut reaped = lock(&thread_reaped);
                    let code = match child.wait() {
                        Ok(status) => Some(status.exit_code()),
                        Err(e) => {
                            warn!(session = %thread_id, "Failed to reap child: {}", e);
                            None
                        }
                    };
                    *reaped = true;
                    code
                };
                let _ = events.blocking_send(ProcessEvent::Exited {
                    id: thread_id,
                    exit_code,
                });
            });

        if let Err(e) = started {
            abandon_child(&id, &mut child);
            return Err(PtyError::CreateFailed(format!(
                "failed to start reader thread: {e}"
            )));
        }
        if let Err(std::sync::mpsc::SendError(mut child)) = child_tx.send(child) {
            abandon_child(&id, &mut child);
            return Err(PtyError::CreateFailed("reader thread exited early".to_string()));
        }

        info!(
            session = %id,
            "Spawned '{}' with PID {:?} ({}x{})",
            self.config.command, pid, request.cols, request.rows
        );
        Ok(Box::new(PtyProcess {
            master: pair.master,
            writer,
            killer,
            pid,
            reaped,
            exited: false,
        }))
    }
}

/// Kill and reap a child that will never be handed out.
fn abandon_child(session: &SessionId, child: &mut Box<dyn Child + Send + Sync>) {
    warn!(session = %session, "Rolling back partially spawned shell");
    if let Err(e) = child.kill() {
        warn!(session = %session, "Failed to kill abandoned shell: {}", e);
    }
    if let Err(e) = child.wait() {
        warn!(session = %session, "Failed to reap abandoned shell: {}", e);
    }
}

fn lock(reaped: &Mutex<bool>) -> MutexGuard<'_, bool> {
    reaped.lock().unwrap_or_else(|p| p.into_inner())
}

/// A shell running on a native pseudo-terminal.
pub struct PtyProcess {
    master: Box<dyn MasterPty + Send>,
    writer: Box<dyn Write + Send>,
    killer: Box<dyn ChildKiller + Send + Sync>,
    pid: Option<u32>,
    /// Set by the reader thread once the child has been waited on
    reaped: Arc<Mutex<bool>>,
    exited: bool,
}

impl ProcessHandle for PtyProcess {
    fn pid(&self) -> Option<u32> {
        self.pid
    }

    fn write(&mut self, data: &[u8]) -> Result<(), PtyError> {
        if self.exited {
            return Err(PtyError::ProcessExited);
        }
        self.writer
            .write_all(data)
            .map_err(|e| PtyError::WriteFailed(e.to_string()))?;
        self.writer
            .flush()
            .map_err(|e| PtyError::WriteFailed(e.to_string()))
    }

    fn resize(&mut self, cols: u16, rows: u16) -> Result<(), PtyError> {
        self.master
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| PtyError::ResizeFailed(e.to_string()))
    }

    fn kill(&mut self) -> Result<(), PtyError> {
        // Held while signalling so the pid cannot be reaped and reused meanwhile.
        let reaped = lock(&self.reaped);
        if *reaped {
            debug!(pid = ?self.pid, "Process already reaped, not signalling");
            self.exited = true;
            return Ok(());
        }

        #[cfg(unix)]
        {
            use nix::sys::signal::{Signal, kill};
            use nix::unistd::Pid;

            // Interactive shells ignore SIGTERM; a hangup is what a closed terminal sends.
            if let Some(pid) = self.pid {
                kill(Pid::from_raw(pid as i32), Signal::SIGHUP)
                    .map_err(|e| PtyError::KillFailed(e.to_string()))?;
                self.exited = true;
                return Ok(());
            }
        }

        self.killer
            .kill()
            .map_err(|e| PtyError::KillFailed(e.to_string()))?;
        self.exited = true;
        Ok(())
    }
}
