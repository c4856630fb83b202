use std::time::Duration;

/// Maximum bytes held in the framing buffer for a single stream. Once
/// exceeded, the stream is truncated and no further records are framed.
pub const MAX_BUFFERED_BYTES: usize = 1024 * 1024;

/// Prefix carried by every payload line of the execution stream.
pub const DATA_LINE_PREFIX: &str = "data: ";

/// Provisional text shown while it is not yet known whether the model is
/// about to call a tool or reply directly.
pub const REASONING_PLACEHOLDER_TEXT: &str = "Thinking…";

/// Argument field progressively surfaced while tool-call arguments stream in.
pub const TOOL_THOUGHT_FIELD: &str = "thought";

/// Case-insensitive marker distinguishing a kernel crash from an ordinary
/// execution error.
pub const KERNEL_FATAL_MARKER: &str = "kernel";

/// How long transient execution state stays visible after a terminal event.
pub const COMPLETED_GRACE: Duration = Duration::from_secs(1);
pub const ERROR_GRACE: Duration = Duration::from_secs(3);
pub const INTERRUPTED_GRACE: Duration = Duration::from_secs(3);
pub const KERNEL_FATAL_GRACE: Duration = Duration::from_secs(10);

/// Status labels surfaced alongside a running or settling cell.
pub const LABEL_RUNNING: &str = "Running";
pub const LABEL_COMPLETED: &str = "Completed";
pub const LABEL_ERROR: &str = "Execution error";
pub const LABEL_KERNEL_FATAL: &str = "Kernel error, waiting for restart";
pub const LABEL_INTERRUPTED: &str = "Interrupted";

/// Endpoint path fragments, relative to the client's base URL.
pub const CONVERSATION_STREAM_PATH: &str = "/api/sessions";
pub const NOTEBOOK_PATH: &str = "/api/notebooks";
pub const STOP_CELL_PATH: &str = "stop_cell_execution";

/// Log snippet bound for malformed records.
pub const SNIPPET_CHARS: usize = 200;
