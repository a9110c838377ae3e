use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::process::ChildStdin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Local};
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use parking_lot::Mutex;

use super::line_buffer::LineBuffer;
use crate::error::ProcessError;

/// Static description of one supervised command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessDefinition {
    /// Unique, stable key.
    pub id: String,
    /// Display name.
    pub title: String,
    /// Executable followed by its arguments.
    pub command: Vec<String>,
    /// Working directory; inherits ours when `None`.
    pub cwd: Option<PathBuf>,
    /// Run `command` joined by spaces through `sh -c`.
    pub shell: bool,
    /// Extra environment, applied after the forced color variables.
    pub env: BTreeMap<String, String>,
}

impl ProcessDefinition {
    pub fn new(id: impl Into<String>, command: Vec<String>) -> Self {
        let id = id.into();
        Self {
            title: id.clone(),
            id,
            command,
            cwd: None,
            shell: false,
            env: BTreeMap::new(),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// The program and arguments actually handed to the OS, or `None`
    /// when there is nothing to run.
    pub fn argv(&self) -> Option<(String, Vec<String>)> {
        let (program, args) = self.command.split_first()?;
        if self.shell {
            return Some((
                "sh".to_string(),
                vec!["-c".to_string(), self.command.join(" ")],
            ));
        }
        Some((program.clone(), args.to_vec()))
    }
}

/// Handle to a live child process. The runner that spawned it owns the
/// `Child`; everyone else can only signal the group or close stdin.
#[derive(Debug)]
pub struct ProcessHandle {
    pid: u32,
    stdin: Mutex<Option<ChildStdin>>,
    kill_requested: AtomicBool,
}

impl ProcessHandle {
    pub fn new(pid: u32, stdin: Option<ChildStdin>) -> Self {
        Self {
            pid,
            stdin: Mutex::new(stdin),
            kill_requested: AtomicBool::new(false),
        }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// The child leads its own group, so the group id is its pid.
    pub fn pgid(&self) -> i32 {
        self.pid as i32
    }

    /// Drop our end of the child's stdin. Returns false if already closed.
    pub fn close_stdin(&self) -> bool {
        self.stdin.lock().take().is_some()
    }

    /// Deliver `signal` to every process in the child's group.
    pub fn signal_group(&self, signal: Signal) -> Result<(), ProcessError> {
        killpg(Pid::from_raw(self.pgid()), signal).map_err(|source| ProcessError::Signal {
            pgid: self.pgid(),
            source,
        })
    }

    pub fn request_kill(&self) {
        self.kill_requested.store(true, Ordering::SeqCst);
    }

    pub fn kill_requested(&self) -> bool {
        self.kill_requested.load(Ordering::SeqCst)
    }
}

/// Lifecycle of one process. Transitions only move forward:
/// `Unlaunched -> Launched -> Finished | Failed`.
#[derive(Debug, Clone)]
pub enum ProcessState {
    Unlaunched {
        lines: LineBuffer,
    },
    Launched {
        lines: LineBuffer,
        handle: Arc<ProcessHandle>,
        kill_requested: bool,
    },
    Finished {
        lines: LineBuffer,
        /// Absent when the process was terminated by a signal.
        code: Option<i32>,
        signal: Option<i32>,
        at: DateTime<Local>,
    },
    Failed {
        lines: LineBuffer,
        error: Arc<ProcessError>,
        at: DateTime<Local>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    Unlaunched,
    Launched,
    Finished,
    Failed,
}

impl ProcessStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessStatus::Unlaunched => "unlaunched",
            ProcessStatus::Launched => "launched",
            ProcessStatus::Finished => "finished",
            ProcessStatus::Failed => "error",
        }
    }
}

impl fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ProcessState {
    pub fn unlaunched(lines: LineBuffer) -> Self {
        ProcessState::Unlaunched { lines }
    }

    pub fn failed(lines: LineBuffer, error: ProcessError) -> Self {
        ProcessState::Failed {
            lines,
            error: Arc::new(error),
            at: Local::now(),
        }
    }

    pub fn lines(&self) -> &LineBuffer {
        match self {
            ProcessState::Unlaunched { lines }
            | ProcessState::Launched { lines, .. }
            | ProcessState::Finished { lines, .. }
            | ProcessState::Failed { lines, .. } => lines,
        }
    }

    pub fn status(&self) -> ProcessStatus {
        match self {
            ProcessState::Unlaunched { .. } => ProcessStatus::Unlaunched,
            ProcessState::Launched { .. } => ProcessStatus::Launched,
            ProcessState::Finished { .. } => ProcessStatus::Finished,
            ProcessState::Failed { .. } => ProcessStatus::Failed,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProcessState::Finished { .. } | ProcessState::Failed { .. }
        )
    }

    pub fn handle(&self) -> Option<&Arc<ProcessHandle>> {
        match self {
            ProcessState::Launched { handle, .. } => Some(handle),
            _ => None,
        }
    }

    /// Same state with a different output buffer.
    pub fn with_lines(&self, lines: LineBuffer) -> Self {
        match self {
            ProcessState::Unlaunched { .. } => ProcessState::Unlaunched { lines },
            ProcessState::Launched {
                handle,
                kill_requested,
                ..
            } => ProcessState::Launched {
                lines,
                handle: handle.clone(),
                kill_requested: *kill_requested,
            },
            ProcessState::Finished {
                code, signal, at, ..
            } => ProcessState::Finished {
                lines,
                code: *code,
                signal: *signal,
                at: *at,
            },
            ProcessState::Failed { error, at, .. } => ProcessState::Failed {
                lines,
                error: error.clone(),
                at: *at,
            },
        }
    }

    /// A `Launched` state flagged for termination; `None` for any other state.
    pub fn with_kill_requested(&self) -> Option<Self> {
        match self {
            ProcessState::Launched { lines, handle, .. } => Some(ProcessState::Launched {
                lines: lines.clone(),
                handle: handle.clone(),
                kill_requested: true,
            }),
            _ => None,
        }
    }

    /// One-line summary for list rows and headless output.
    pub fn describe(&self) -> String {
        match self {
            ProcessState::Unlaunched { .. } => "waiting to launch".to_string(),
            ProcessState::Launched {
                handle,
                kill_requested,
                ..
            } => {
                if *kill_requested {
                    format!("pid {} (stopping)", handle.pid())
                } else {
                    format!("pid {}", handle.pid())
                }
            }
            ProcessState::Finished {
                code: Some(code), ..
            } => format!("exited with code {}", code),
            ProcessState::Finished {
                signal: Some(sig), ..
            } => match Signal::try_from(*sig) {
                Ok(s) => format!("terminated by {}", s.as_str()),
                Err(_) => format!("terminated by signal {}", sig),
            },
            ProcessState::Finished { .. } => "exited".to_string(),
            ProcessState::Failed { error, .. } => format!("error: {}", error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buf(lines: &[&str]) -> LineBuffer {
        LineBuffer::default().append(lines.iter().map(|s| s.to_string()).collect())
    }

    #[test]
    fn test_argv_plain() {
        let def = ProcessDefinition::new("a", vec!["echo".into(), "hi".into()]);
        assert_eq!(
            def.argv(),
            Some(("echo".to_string(), vec!["hi".to_string()]))
        );
        assert_eq!(def.title, "a");
    }

    #[test]
    fn test_argv_shell_joins_command() {
        let mut def = ProcessDefinition::new("a", vec!["yarn".into(), "serve".into()]);
        def.shell = true;
        assert_eq!(
            def.argv(),
            Some((
                "sh".to_string(),
                vec!["-c".to_string(), "yarn serve".to_string()]
            ))
        );
    }

    #[test]
    fn test_argv_empty_command() {
        let mut def = ProcessDefinition::new("a", Vec::new());
        assert_eq!(def.argv(), None);
        def.shell = true;
        assert_eq!(def.argv(), None);
    }

    #[test]
    fn test_status_labels() {
        assert_eq!(ProcessStatus::Unlaunched.to_string(), "unlaunched");
        assert_eq!(ProcessStatus::Launched.to_string(), "launched");
        assert_eq!(ProcessStatus::Finished.to_string(), "finished");
        assert_eq!(ProcessStatus::Failed.to_string(), "error");
    }

    #[test]
    fn test_failed_keeps_lines() {
        let state = ProcessState::failed(buf(&["boom"]), ProcessError::NoCommand);
        assert_eq!(state.status(), ProcessStatus::Failed);
        assert!(state.is_terminal());
        assert_eq!(state.lines().size(), 1);
        assert_eq!(state.describe(), "error: no command specified");
    }

    #[test]
    fn test_with_lines_preserves_variant() {
        let finished = ProcessState::Finished {
            lines: LineBuffer::default(),
            code: Some(3),
            signal: None,
            at: Local::now(),
        };
        let next = finished.with_lines(buf(&["a", "b"]));
        assert!(matches!(next, ProcessState::Finished { code: Some(3), .. }));
        assert_eq!(next.lines().size(), 2);
        assert_eq!(next.describe(), "exited with code 3");
    }

    #[test]
    fn test_kill_requested_only_for_launched() {
        let handle = Arc::new(ProcessHandle::new(42, None));
        let launched = ProcessState::Launched {
            lines: buf(&["x"]),
            handle,
            kill_requested: false,
        };
        let flagged = launched.with_kill_requested().unwrap();
        assert!(matches!(
            flagged,
            ProcessState::Launched {
                kill_requested: true,
                ..
            }
        ));
        assert_eq!(flagged.lines().size(), 1);
        assert_eq!(flagged.describe(), "pid 42 (stopping)");

        let idle = ProcessState::unlaunched(LineBuffer::default());
        assert!(idle.with_kill_requested().is_none());
        assert!(!idle.is_terminal());
    }

    #[test]
    fn test_describe_signal_exit() {
        let state = ProcessState::Finished {
            lines: LineBuffer::default(),
            code: None,
            signal: Some(15),
            at: Local::now(),
        };
        assert_eq!(state.describe(), "terminated by SIGTERM");
    }

    #[test]
    fn test_signal_missing_group_is_error() {
        // Above any kernel pid_max, so the group cannot exist.
        let handle = ProcessHandle::new(0x3fff_fff0, None);
        let err = handle.signal_group(Signal::SIGTERM).err().unwrap();
        assert!(matches!(err, ProcessError::Signal { pgid: 0x3fff_fff0, .. }));
    }

    #[test]
    fn test_close_stdin_once() {
        let handle = ProcessHandle::new(1, None);
        assert!(!handle.close_stdin());
        assert!(!handle.kill_requested());
        handle.request_kill();
        assert!(handle.kill_requested());
    }
}
