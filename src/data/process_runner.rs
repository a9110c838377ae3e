use std::io::{ErrorKind, Read};
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::process::{Command, Stdio};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use chrono::Local;
use tracing::{debug, info, warn};

use super::line_splitter::LineSplitter;
use crate::error::ProcessError;
use crate::model::line_buffer::LineBuffer;
use crate::model::process::{ProcessDefinition, ProcessHandle, ProcessState};

const READ_CHUNK: usize = 8192;

/// Launch one process and report every state change through `on_change`.
///
/// An empty command fails synchronously and returns `None`. Otherwise the
/// work happens on a runner thread: it spawns the child in its own process
/// group, reads stdout and stderr on two more threads, appends each read's
/// lines as one block, and finishes with exactly one terminal state.
/// `on_change` is never called again after that.
pub fn launch<F>(
    definition: Arc<ProcessDefinition>,
    initial: Arc<ProcessState>,
    mut on_change: F,
) -> Option<JoinHandle<()>>
where
    F: FnMut(Arc<ProcessState>) + Send + 'static,
{
    let Some((program, args)) = definition.argv() else {
        warn!(id = %definition.id, "no command specified");
        on_change(Arc::new(ProcessState::failed(
            initial.lines().clone(),
            ProcessError::NoCommand,
        )));
        return None;
    };

    let lines = initial.lines().clone();
    Some(thread::spawn(move || {
        run(&definition, program, args, lines, on_change)
    }))
}

fn run<F>(
    definition: &ProcessDefinition,
    program: String,
    args: Vec<String>,
    mut lines: LineBuffer,
    mut on_change: F,
) where
    F: FnMut(Arc<ProcessState>),
{
    let mut cmd = Command::new(&program);
    cmd.args(&args)
        .env("TERM", "xterm-256color")
        .env("FORCE_COLOR", "true")
        .envs(&definition.env)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        // New group led by the child, so group signals reach its descendants
        // and never us.
        .process_group(0);
    if let Some(ref cwd) = definition.cwd {
        cmd.current_dir(cwd);
    }

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(source) => {
            warn!(id = %definition.id, %program, error = %source, "spawn failed");
            on_change(Arc::new(ProcessState::failed(
                lines,
                ProcessError::Spawn { program, source },
            )));
            return;
        }
    };

    let handle = Arc::new(ProcessHandle::new(child.id(), child.stdin.take()));
    info!(id = %definition.id, pid = handle.pid(), %program, "process launched");
    on_change(Arc::new(launched(&lines, &handle)));

    let (tx, rx) = mpsc::channel::<Vec<String>>();
    let mut readers = Vec::new();
    if let Some(stdout) = child.stdout.take() {
        readers.push(spawn_reader(&definition.id, "stdout", stdout, tx.clone()));
    }
    if let Some(stderr) = child.stderr.take() {
        readers.push(spawn_reader(&definition.id, "stderr", stderr, tx.clone()));
    }
    drop(tx);

    // Ends once both readers hit EOF and drop their senders.
    for block in rx {
        lines = lines.append(block);
        on_change(Arc::new(launched(&lines, &handle)));
    }
    for reader in readers {
        let _ = reader.join();
    }

    let terminal = match child.wait() {
        Ok(status) => {
            info!(id = %definition.id, pid = handle.pid(), %status, "process exited");
            ProcessState::Finished {
                lines,
                code: status.code(),
                signal: status.signal(),
                at: Local::now(),
            }
        }
        Err(e) => {
            warn!(id = %definition.id, pid = handle.pid(), error = %e, "wait failed");
            ProcessState::failed(lines, ProcessError::Wait(e))
        }
    };
    handle.close_stdin();
    on_change(Arc::new(terminal));
}

fn launched(lines: &LineBuffer, handle: &Arc<ProcessHandle>) -> ProcessState {
    ProcessState::Launched {
        lines: lines.clone(),
        handle: handle.clone(),
        kill_requested: handle.kill_requested(),
    }
}

/// Read `source` until EOF, sending one block per read that completed at
/// least one line.
fn spawn_reader<R>(
    id: &str,
    stream: &'static str,
    mut source: R,
    tx: mpsc::Sender<Vec<String>>,
) -> JoinHandle<()>
where
    R: Read + Send + 'static,
{
    let id = id.to_string();
    thread::spawn(move || {
        let mut splitter = LineSplitter::new();
        let mut buf = [0u8; READ_CHUNK];
        loop {
            match source.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    let lines = splitter.push(&buf[..n]);
                    if !lines.is_empty() && tx.send(lines).is_err() {
                        return;
                    }
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!(%id, stream, error = %e, "read failed");
                    break;
                }
            }
        }
        if let Some(last) = splitter.finish() {
            let _ = tx.send(vec![last]);
        }
        debug!(%id, stream, "stream closed");
    })
}
