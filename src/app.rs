use std::collections::HashSet;
use std::time::{Duration, Instant};

use nix::sys::signal::Signal;
use tracing::{info, warn};

use crate::config::Config;
use crate::data::supervisor::Supervisor;
use crate::model::snapshot::{ProcEntry, Snapshot};

#[derive(Debug, Clone, PartialEq)]
pub enum ProcessesPane {
    List,
    Output,
}

pub struct App {
    pub supervisor: Supervisor,
    pub snapshot: Snapshot,

    // Navigation
    pub process_index: usize,
    pub processes_pane: ProcessesPane,
    /// First visible output line when not following.
    pub process_output_scroll: usize,
    pub process_follow: bool,
    /// Rows the output pane can show, refreshed from the terminal size.
    pub output_height: usize,

    pub show_help: bool,
    pub last_error: Option<String>,
    pub dirty: bool,

    // Shutdown
    pub exiting: bool,
    pub exit_deadline: Option<Instant>,
    pub should_quit: bool,
    kill_signal: Signal,
    grace_period: Duration,
    signalled: HashSet<u32>,
}

impl App {
    pub fn new(supervisor: Supervisor, config: &Config, kill_signal: Signal) -> Self {
        let snapshot = supervisor.get_state();
        Self {
            supervisor,
            snapshot,
            process_index: 0,
            processes_pane: ProcessesPane::List,
            process_output_scroll: 0,
            process_follow: true,
            output_height: 0,
            show_help: false,
            last_error: None,
            dirty: true,
            exiting: false,
            exit_deadline: None,
            should_quit: false,
            kill_signal,
            grace_period: config.grace_period(),
            signalled: HashSet::new(),
        }
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn handle_snapshot(&mut self, snapshot: Snapshot) {
        self.snapshot = snapshot;
        if self.exiting {
            // Anything that launched after the quit request still gets stopped.
            self.supervisor
                .kill_remaining(self.kill_signal, &mut self.signalled);
            if self.snapshot.is_settled() {
                self.should_quit = true;
            }
        }
        self.mark_dirty();
    }

    /// Called on every tick: leave once the grace period runs out.
    pub fn tick(&mut self) {
        if let Some(deadline) = self.exit_deadline {
            if Instant::now() >= deadline {
                warn!("grace period expired, leaving processes behind");
                self.should_quit = true;
            }
        }
    }

    /// First quit request stops everything and waits; a second one leaves
    /// immediately.
    pub fn request_quit(&mut self) {
        if self.exiting {
            self.should_quit = true;
            return;
        }
        info!("quit requested");
        self.exiting = true;
        self.exit_deadline = Some(Instant::now() + self.grace_period);
        self.supervisor
            .kill_remaining(self.kill_signal, &mut self.signalled);
        if self.snapshot.is_settled() {
            self.should_quit = true;
        }
        self.mark_dirty();
    }

    // --- Selection ---

    pub fn selected_process(&self) -> Option<&ProcEntry> {
        if self.snapshot.is_empty() {
            return None;
        }
        let idx = self.process_index.min(self.snapshot.len() - 1);
        self.snapshot.entry(idx)
    }

    pub fn next_pane(&mut self) {
        self.processes_pane = ProcessesPane::Output;
    }

    pub fn prev_pane(&mut self) {
        self.processes_pane = ProcessesPane::List;
    }

    pub fn move_down(&mut self) {
        match self.processes_pane {
            ProcessesPane::List => {
                if !self.snapshot.is_empty() {
                    self.process_index = (self.process_index + 1).min(self.snapshot.len() - 1);
                    self.reset_output_view();
                }
            }
            ProcessesPane::Output => {
                self.process_output_scroll = self.process_output_scroll.saturating_add(1);
                let max = self.max_scroll();
                if self.process_output_scroll >= max {
                    self.process_output_scroll = max;
                    self.process_follow = true;
                }
            }
        }
    }

    pub fn move_up(&mut self) {
        match self.processes_pane {
            ProcessesPane::List => {
                self.process_index = self.process_index.saturating_sub(1);
                self.reset_output_view();
            }
            ProcessesPane::Output => {
                if self.process_follow {
                    self.process_follow = false;
                    self.process_output_scroll = self.max_scroll();
                }
                self.process_output_scroll = self.process_output_scroll.saturating_sub(1);
            }
        }
    }

    pub fn jump_top(&mut self) {
        match self.processes_pane {
            ProcessesPane::List => {
                self.process_index = 0;
                self.reset_output_view();
            }
            ProcessesPane::Output => {
                self.process_follow = false;
                self.process_output_scroll = 0;
            }
        }
    }

    pub fn jump_bottom(&mut self) {
        match self.processes_pane {
            ProcessesPane::List => {
                if !self.snapshot.is_empty() {
                    self.process_index = self.snapshot.len() - 1;
                    self.reset_output_view();
                }
            }
            ProcessesPane::Output => {
                self.process_follow = true;
            }
        }
    }

    pub fn toggle_follow(&mut self) {
        self.process_follow = !self.process_follow;
        if !self.process_follow {
            self.process_output_scroll = self.max_scroll();
        }
    }

    fn reset_output_view(&mut self) {
        self.process_output_scroll = 0;
        self.process_follow = true;
    }

    /// Offset at which the last line sits on the bottom row, matching what
    /// the output pane renders in follow mode.
    fn max_scroll(&self) -> usize {
        self.selected_process()
            .map(|p| {
                let lines = p.state.lines();
                let mut height = self.output_height;
                if lines.evicted() > 0 {
                    // One row goes to the dropped-lines notice.
                    height = height.saturating_sub(1);
                }
                lines.size().saturating_sub(height.max(1))
            })
            .unwrap_or(0)
    }

    // --- Process control ---

    pub fn kill_selected_process(&mut self) {
        let Some(id) = self.selected_process().map(|p| p.definition.id.clone()) else {
            return;
        };
        match self.supervisor.kill_proc(&id, self.kill_signal) {
            Ok(true) => self.last_error = None,
            Ok(false) => {}
            Err(e) => self.last_error = Some(e.to_string()),
        }
    }

    pub fn kill_all_processes(&mut self) {
        self.supervisor.kill_all(self.kill_signal);
    }
}
