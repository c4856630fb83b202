use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;
use tracing_error::SpanTrace;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct MessageId(pub Uuid);

impl MessageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct CellId(pub String);

impl From<String> for CellId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for CellId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Assistant,
}

/// One logical item of the reconstructed conversation. Created when a
/// lifecycle event opens a new item; `content` and `reasoning_summary` are
/// append-only while `is_streaming` is true.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub sender: Sender,
    pub content: String,
    pub is_streaming: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_name: Option<String>,
}

impl Message {
    pub fn assistant() -> Self {
        Self {
            id: MessageId::new(),
            sender: Sender::Assistant,
            content: String::new(),
            is_streaming: true,
            reasoning_summary: None,
            function_name: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            id: MessageId::new(),
            sender: Sender::User,
            content: content.into(),
            is_streaming: false,
            reasoning_summary: None,
            function_name: None,
        }
    }
}

/// The single in-flight tool call. At most one exists at a time; the next
/// call may not open until this one's argument stream is signaled done.
#[derive(Debug, Clone)]
pub struct ActiveToolCall {
    pub function_name: String,
    pub raw_arguments: String,
    /// Companion message carrying the progressively extracted thought text.
    pub thought_message: MessageId,
}

/// --- NOTEBOOK WIRE TYPES ---

/// Mime payloads arrive either as one string or as an array of lines; the
/// array form must be joined before use.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum MultilineText {
    Single(String),
    Lines(Vec<String>),
}

impl MultilineText {
    pub fn joined(&self) -> String {
        match self {
            Self::Single(s) => s.clone(),
            Self::Lines(lines) => lines.concat(),
        }
    }
}

impl Default for MultilineText {
    fn default() -> Self {
        Self::Single(String::new())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct MimeBundle(pub BTreeMap<String, MultilineText>);

impl MimeBundle {
    /// Returns the joined payload for one mime type, if present.
    pub fn joined(&self, mime: &str) -> Option<String> {
        self.0.get(mime).map(MultilineText::joined)
    }

    pub fn contains(&self, mime: &str) -> bool {
        self.0.contains_key(mime)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StreamName {
    #[default]
    Stdout,
    Stderr,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "output_type", rename_all = "snake_case")]
pub enum OutputItem {
    Stream {
        #[serde(default)]
        name: StreamName,
        text: MultilineText,
    },
    ExecuteResult {
        #[serde(default)]
        execution_count: Option<u32>,
        data: MimeBundle,
    },
    Error {
        ename: String,
        evalue: String,
        #[serde(default)]
        traceback: Vec<String>,
    },
    DisplayData {
        data: MimeBundle,
    },
}

/// Persisted state of a notebook cell. `outputs` and `execution_count` are
/// only ever set from a `completed` event's terminal payload.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NotebookCell {
    pub id: Option<CellId>,
    pub source: String,
    pub execution_count: Option<u32>,
    pub outputs: Vec<OutputItem>,
}

/// --- ERRORS ---

#[derive(Error, Debug)]
pub enum RestitchError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Upstream error (status {0}): {1}")]
    Upstream(reqwest::StatusCode, String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Stream output truncated after {0} bytes")]
    Truncated(usize),

    #[error("Internal error: {0}")]
    Internal(String, SpanTrace),
}

#[derive(Debug)]
pub struct ObservedError {
    pub inner: RestitchError,
    pub span_trace: SpanTrace,
}

impl fmt::Display for ObservedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\n\nSpan Trace:\n{}", self.inner, self.span_trace)
    }
}

impl std::error::Error for ObservedError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.inner)
    }
}

impl<E> From<E> for ObservedError
where
    E: Into<RestitchError>,
{
    fn from(error: E) -> Self {
        Self {
            inner: error.into(),
            span_trace: SpanTrace::capture(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ObservedError>;
