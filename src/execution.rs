use crate::constants::{
    COMPLETED_GRACE, ERROR_GRACE, INTERRUPTED_GRACE, KERNEL_FATAL_GRACE, KERNEL_FATAL_MARKER,
    LABEL_COMPLETED, LABEL_ERROR, LABEL_INTERRUPTED, LABEL_KERNEL_FATAL, LABEL_RUNNING,
};
use crate::envelope::{ExecEvent, ExecRecord};
use crate::types::{CellId, NotebookCell, OutputItem};
use std::time::Duration;

/// How long transient state (live outputs, status label) stays visible
/// after each terminal event. The delay is a display grace period, not a
/// correctness requirement.
#[derive(Debug, Clone)]
pub struct ExecutionConfig {
    pub completed_grace: Duration,
    pub error_grace: Duration,
    pub interrupted_grace: Duration,
    /// A kernel crash needs recovery time beyond the failing cell.
    pub kernel_fatal_grace: Duration,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            completed_grace: COMPLETED_GRACE,
            error_grace: ERROR_GRACE,
            interrupted_grace: INTERRUPTED_GRACE,
            kernel_fatal_grace: KERNEL_FATAL_GRACE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalKind {
    Completed,
    Error { kernel_fatal: bool },
    Interrupted,
}

/// Rebuilds one cell's execution lifecycle from its event stream:
/// `started` then any number of `output` events, ended by exactly one of
/// `completed`, `error`, or `interrupted`. Each running cell gets its own
/// independent instance.
pub struct ExecutionReconstructor {
    cell_id: CellId,
    config: ExecutionConfig,
    executing: bool,
    status_label: Option<String>,
    live_outputs: Vec<OutputItem>,
    cell: NotebookCell,
    terminal: Option<TerminalKind>,
    error: Option<String>,
}

impl ExecutionReconstructor {
    pub fn new(cell_id: impl Into<CellId>, source: impl Into<String>) -> Self {
        Self::with_config(cell_id, source, ExecutionConfig::default())
    }

    pub fn with_config(
        cell_id: impl Into<CellId>,
        source: impl Into<String>,
        config: ExecutionConfig,
    ) -> Self {
        let cell_id = cell_id.into();
        Self {
            cell: NotebookCell {
                id: Some(cell_id.clone()),
                source: source.into(),
                execution_count: None,
                outputs: Vec::new(),
            },
            cell_id,
            config,
            executing: false,
            status_label: None,
            live_outputs: Vec::new(),
            terminal: None,
            error: None,
        }
    }

    pub fn cell_id(&self) -> &CellId {
        &self.cell_id
    }

    pub fn is_executing(&self) -> bool {
        self.executing
    }

    pub fn status_label(&self) -> Option<&str> {
        self.status_label.as_deref()
    }

    /// Streamed-but-not-persisted outputs; discarded (not merged) once a
    /// terminal event lands and the grace window passes.
    pub fn live_outputs(&self) -> &[OutputItem] {
        &self.live_outputs
    }

    pub fn cell(&self) -> &NotebookCell {
        &self.cell
    }

    pub fn terminal(&self) -> Option<&TerminalKind> {
        self.terminal.as_ref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Grace window matching the terminal event, once one has arrived.
    pub fn grace_period(&self) -> Option<Duration> {
        match self.terminal.as_ref()? {
            TerminalKind::Completed => Some(self.config.completed_grace),
            TerminalKind::Error { kernel_fatal: true } => Some(self.config.kernel_fatal_grace),
            TerminalKind::Error { kernel_fatal: false } => Some(self.config.error_grace),
            TerminalKind::Interrupted => Some(self.config.interrupted_grace),
        }
    }

    /// Applies one decoded record. Returns true when the record terminates
    /// this execution.
    pub fn apply(&mut self, record: ExecRecord) -> bool {
        if record.cell_id != self.cell_id.0 {
            tracing::warn!(
                "[EXEC] Record for cell {} delivered to cell {}; ignoring",
                record.cell_id,
                self.cell_id
            );
            return false;
        }
        if self.terminal.is_some() {
            tracing::warn!(
                "[EXEC] Event after terminal for cell {}; ignoring",
                self.cell_id
            );
            return false;
        }

        match record.event {
            ExecEvent::Started => {
                self.executing = true;
                self.status_label = Some(LABEL_RUNNING.to_string());
                false
            }
            ExecEvent::Output { output } => {
                self.live_outputs.push(output);
                false
            }
            ExecEvent::Completed {
                execution_count,
                outputs,
                status,
                error,
                started_at,
                completed_at,
            } => {
                self.cell.execution_count = execution_count;
                self.cell.outputs = outputs;
                self.error = error;
                self.finish_with(TerminalKind::Completed, LABEL_COMPLETED);
                let elapsed = parse_elapsed(started_at.as_deref(), completed_at.as_deref());
                tracing::debug!(
                    "[EXEC] Cell {} completed with status '{}' ({} outputs{})",
                    self.cell_id,
                    status,
                    self.cell.outputs.len(),
                    match elapsed {
                        Some(ms) => format!(", {} ms", ms),
                        None => String::new(),
                    }
                );
                true
            }
            ExecEvent::Error { error, traceback } => {
                let kernel_fatal = error.to_lowercase().contains(KERNEL_FATAL_MARKER);
                let label = if kernel_fatal {
                    LABEL_KERNEL_FATAL
                } else {
                    LABEL_ERROR
                };
                if let Some(tb) = traceback {
                    tracing::debug!("[EXEC] Cell {} traceback: {}", self.cell_id, tb.join("\n"));
                }
                self.error = Some(error);
                self.finish_with(TerminalKind::Error { kernel_fatal }, label);
                true
            }
            ExecEvent::Interrupted { message } => {
                self.error = message;
                self.finish_with(TerminalKind::Interrupted, LABEL_INTERRUPTED);
                true
            }
        }
    }

    /// Stream closed without a terminal event. Cooperative cancellation
    /// makes this equivalent to "stop succeeded".
    pub fn finish(&mut self) {
        if self.terminal.is_none() {
            self.finish_with(TerminalKind::Interrupted, LABEL_INTERRUPTED);
        }
    }

    /// Transport failure mid-execution.
    pub fn fail(&mut self, error: impl Into<String>) {
        if self.terminal.is_none() {
            self.error = Some(error.into());
            self.finish_with(TerminalKind::Error { kernel_fatal: false }, LABEL_ERROR);
        }
    }

    /// Clears the transient display state after the grace window. Persisted
    /// cell outputs are untouched.
    pub fn settle(&mut self) {
        self.live_outputs.clear();
        self.status_label = None;
    }

    fn finish_with(&mut self, terminal: TerminalKind, label: &str) {
        self.executing = false;
        self.terminal = Some(terminal);
        self.status_label = Some(label.to_string());
    }
}

fn parse_elapsed(started_at: Option<&str>, completed_at: Option<&str>) -> Option<i64> {
    let started = chrono::DateTime::parse_from_rfc3339(started_at?).ok()?;
    let completed = chrono::DateTime::parse_from_rfc3339(completed_at?).ok()?;
    Some((completed - started).num_milliseconds())
}
