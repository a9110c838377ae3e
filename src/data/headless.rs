use std::io::{self, Write};

use crate::model::process::ProcessState;
use crate::model::snapshot::Snapshot;

/// Prints newly captured lines as `[title] line`, remembering how far each
/// process has been printed.
#[derive(Debug)]
pub struct HeadlessPrinter {
    printed: Vec<usize>,
    reported: Vec<bool>,
}

impl HeadlessPrinter {
    pub fn new(len: usize) -> Self {
        Self {
            printed: vec![0; len],
            reported: vec![false; len],
        }
    }

    pub fn print<W: Write>(&mut self, snapshot: &Snapshot, out: &mut W) -> io::Result<()> {
        for (slot, entry) in snapshot.iter().enumerate() {
            let (Some(printed), Some(reported)) =
                (self.printed.get_mut(slot), self.reported.get_mut(slot))
            else {
                continue;
            };
            let title = &entry.definition.title;
            let lines = entry.state.lines();

            if lines.total_appended() > *printed {
                if *printed < lines.evicted() {
                    writeln!(
                        out,
                        "[{}] ... {} lines dropped",
                        title,
                        lines.evicted() - *printed
                    )?;
                }
                let from = printed.saturating_sub(lines.evicted());
                for line in lines.lines(from..) {
                    writeln!(out, "[{}] {}", title, line)?;
                }
                *printed = lines.total_appended();
            }

            if entry.state.is_terminal() && !*reported {
                writeln!(out, "[{}] {}", title, entry.state.describe())?;
                *reported = true;
            }
        }
        out.flush()
    }
}

/// Any process that failed to run or exited unsuccessfully.
pub fn any_failed(snapshot: &Snapshot) -> bool {
    snapshot.iter().any(|e| match &*e.state {
        ProcessState::Failed { .. } => true,
        ProcessState::Finished { code, .. } => *code != Some(0),
        ProcessState::Unlaunched { .. } | ProcessState::Launched { .. } => false,
    })
}
