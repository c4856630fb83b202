use crate::constants::SNIPPET_CHARS;
use crate::types::OutputItem;
use serde::Deserialize;

/// One decoded event from the conversation stream. Decoded once at this
/// boundary; downstream code never re-inspects raw text.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "event_type")]
pub enum ConversationEvent {
    #[serde(rename = "heartbeat")]
    Heartbeat,
    #[serde(rename = "response.output_text.delta")]
    OutputTextDelta { delta: String },
    #[serde(rename = "response.reasoning_summary_text.delta")]
    ReasoningSummaryDelta { delta: String },
    #[serde(rename = "response.output_item.added")]
    OutputItemAdded {
        item_type: OutputItemKind,
        #[serde(default)]
        function_name: Option<String>,
    },
    #[serde(rename = "response.function_call_arguments.delta")]
    FunctionCallArgumentsDelta { delta: String },
    #[serde(rename = "response.function_call_arguments.done")]
    FunctionCallArgumentsDone,
    #[serde(rename = "error")]
    Error { error: String },
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OutputItemKind {
    FunctionCall,
    Reasoning,
    Message,
}

/// One decoded event from a cell-execution stream.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecRecord {
    pub cell_id: String,
    pub timestamp: String,
    pub event: ExecEvent,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExecEvent {
    Started,
    Output {
        output: OutputItem,
    },
    Completed {
        execution_count: Option<u32>,
        outputs: Vec<OutputItem>,
        status: String,
        error: Option<String>,
        started_at: Option<String>,
        completed_at: Option<String>,
    },
    Error {
        error: String,
        traceback: Option<Vec<String>>,
    },
    Interrupted {
        message: Option<String>,
    },
}

#[derive(Deserialize)]
struct RawExecRecord {
    event_type: String,
    cell_id: String,
    timestamp: String,
    #[serde(default)]
    data: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct OutputData {
    output: OutputItem,
}

#[derive(Deserialize)]
struct CompletedData {
    #[serde(default)]
    execution_count: Option<u32>,
    #[serde(default)]
    outputs: Vec<OutputItem>,
    #[serde(default)]
    status: String,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    started_at: Option<String>,
    #[serde(default)]
    completed_at: Option<String>,
}

#[derive(Deserialize)]
struct ErrorData {
    error: String,
    #[serde(default)]
    traceback: Option<Vec<String>>,
}

#[derive(Deserialize)]
struct InterruptedData {
    #[serde(default)]
    message: Option<String>,
}

fn snippet(data: &str) -> &str {
    match data.char_indices().nth(SNIPPET_CHARS) {
        Some((idx, _)) => &data[..idx],
        None => data,
    }
}

/// Decodes one framed conversation record. Malformed records are logged and
/// discarded; one bad record must not abort the stream.
pub fn parse_conversation_record(data: &str) -> Option<ConversationEvent> {
    match serde_json::from_str::<ConversationEvent>(data) {
        Ok(event) => Some(event),
        Err(e) => {
            tracing::debug!("[STREAM] Discarding malformed record ({}): {}", e, snippet(data));
            None
        }
    }
}

/// Decodes one framed execution record. The `data` shape depends on the
/// event type, so dispatch happens here rather than in serde attributes.
pub fn parse_exec_record(data: &str) -> Option<ExecRecord> {
    let raw: RawExecRecord = match serde_json::from_str(data) {
        Ok(raw) => raw,
        Err(e) => {
            tracing::debug!("[EXEC] Discarding malformed record ({}): {}", e, snippet(data));
            return None;
        }
    };

    let payload = raw.data.unwrap_or(serde_json::Value::Null);
    let event = match raw.event_type.as_str() {
        "started" => ExecEvent::Started,
        "output" => match serde_json::from_value::<OutputData>(payload) {
            Ok(d) => ExecEvent::Output { output: d.output },
            Err(e) => {
                tracing::debug!("[EXEC] Bad output payload for cell {}: {}", raw.cell_id, e);
                return None;
            }
        },
        "completed" => match serde_json::from_value::<CompletedData>(payload) {
            Ok(d) => ExecEvent::Completed {
                execution_count: d.execution_count,
                outputs: d.outputs,
                status: d.status,
                error: d.error,
                started_at: d.started_at,
                completed_at: d.completed_at,
            },
            Err(e) => {
                tracing::debug!("[EXEC] Bad completed payload for cell {}: {}", raw.cell_id, e);
                return None;
            }
        },
        "error" => match serde_json::from_value::<ErrorData>(payload) {
            Ok(d) => ExecEvent::Error {
                error: d.error,
                traceback: d.traceback,
            },
            Err(e) => {
                tracing::debug!("[EXEC] Bad error payload for cell {}: {}", raw.cell_id, e);
                return None;
            }
        },
        "interrupted" => {
            let message = match serde_json::from_value::<InterruptedData>(payload) {
                Ok(d) => d.message,
                Err(_) => None,
            };
            ExecEvent::Interrupted { message }
        }
        other => {
            tracing::debug!("[EXEC] Unknown event_type '{}' for cell {}", other, raw.cell_id);
            return None;
        }
    };

    Some(ExecRecord {
        cell_id: raw.cell_id,
        timestamp: raw.timestamp,
        event,
    })
}
