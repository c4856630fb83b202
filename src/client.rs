use crate::constants::{CONVERSATION_STREAM_PATH, NOTEBOOK_PATH, STOP_CELL_PATH};
use crate::conversation::ConversationReconstructor;
use crate::envelope::{parse_conversation_record, parse_exec_record};
use crate::execution::ExecutionReconstructor;
use crate::framing::{FramingError, RecordCodec};
use crate::logging::StreamMetric;
use crate::types::{RestitchError, Result};
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tokio_util::codec::FramedRead;
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Serialize)]
pub struct TurnRequest {
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecuteRequest {
    pub cell_id: String,
    pub code: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StopResponse {
    pub success: bool,
}

/// Drives one conversation turn's read loop over any chunked byte stream.
/// Every error class is recovered here and surfaced through the
/// reconstructor's state; nothing propagates past this boundary.
pub async fn consume_conversation_stream<S>(
    bytes: S,
    recon: &mut ConversationReconstructor,
    cancel: &CancellationToken,
) -> StreamMetric
where
    S: Stream<Item = std::io::Result<Bytes>> + Unpin,
{
    let mut metric = StreamMetric::new();
    let mut records = FramedRead::new(StreamReader::new(bytes), RecordCodec::blank_line_delimited());

    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!("[TURN] Consumer torn down; abandoning read loop");
                break;
            }
            next = records.next() => next,
        };
        let Some(item) = next else {
            // Natural stream end; equivalent to a stop that succeeded.
            recon.finish();
            metric.log_summary("conversation");
            return metric;
        };
        match item {
            Ok(record) => {
                metric.record(&record);
                if let Some(event) = parse_conversation_record(&record) {
                    if recon.apply(event) {
                        break;
                    }
                } else {
                    metric.record_malformed();
                }
            }
            Err(FramingError::Truncated(limit)) => {
                recon.fail(format!("Output truncated: stream exceeded {} bytes", limit));
                break;
            }
            Err(FramingError::Io(e)) => {
                recon.fail(format!("Stream read failed: {}", e));
                break;
            }
        }
    }
    metric.log_summary("conversation");
    metric
}

/// Read loop for one cell execution. Returns once a terminal event arrives
/// or the stream ends; transient display state is left for the caller to
/// settle after the grace window.
pub async fn consume_execution_stream<S>(
    bytes: S,
    recon: &mut ExecutionReconstructor,
    cancel: &CancellationToken,
) -> StreamMetric
where
    S: Stream<Item = std::io::Result<Bytes>> + Unpin,
{
    let mut metric = StreamMetric::new();
    let mut records = FramedRead::new(StreamReader::new(bytes), RecordCodec::data_line_delimited());

    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!("[EXEC] Consumer torn down; abandoning read loop");
                break;
            }
            next = records.next() => next,
        };
        let Some(item) = next else {
            recon.finish();
            break;
        };
        match item {
            Ok(record) => {
                metric.record(&record);
                if let Some(event) = parse_exec_record(&record) {
                    if recon.apply(event) {
                        break;
                    }
                } else {
                    metric.record_malformed();
                }
            }
            Err(FramingError::Truncated(limit)) => {
                recon.fail(format!("Output truncated: stream exceeded {} bytes", limit));
                break;
            }
            Err(FramingError::Io(e)) => {
                recon.fail(format!("Stream read failed: {}", e));
                break;
            }
        }
    }
    metric.log_summary("execution");
    metric
}

/// HTTP client for the agent-conversation and cell-execution streams. One
/// instance serves many sessions and cells; each stream gets its own
/// sequential read loop and its own reconstructor.
#[derive(Clone)]
pub struct StreamClient {
    http: reqwest::Client,
    base_url: String,
    executing_cells: Arc<Mutex<HashSet<String>>>,
}

impl StreamClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_http(base_url, reqwest::Client::new())
    }

    pub fn with_http(base_url: impl Into<String>, http: reqwest::Client) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            executing_cells: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Cell ids with an in-flight execution stream.
    pub fn executing_cells(&self) -> HashSet<String> {
        match self.executing_cells.lock() {
            Ok(set) => set.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Sends one user message and consumes the response stream into the
    /// reconstructor. Strictly one turn at a time per session: callers must
    /// not issue a new send while a prior turn's stream is open.
    pub async fn send_turn(
        &self,
        session_id: &str,
        request: &TurnRequest,
        recon: &mut ConversationReconstructor,
        cancel: &CancellationToken,
    ) -> Result<()> {
        recon.push_user_message(request.message.clone());

        let url = format!(
            "{}{}/{}/stream",
            self.base_url, CONVERSATION_STREAM_PATH, session_id
        );
        let response = self
            .http
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(RestitchError::Network)?;

        if !response.status().is_success() {
            return Err(RestitchError::Upstream(
                response.status(),
                response.text().await.unwrap_or_default(),
            )
            .into());
        }

        let bytes = response
            .bytes_stream()
            .map(|r| r.map_err(std::io::Error::other));
        consume_conversation_stream(bytes, recon, cancel).await;
        Ok(())
    }

    /// Executes one cell and consumes its event stream. Multiple cells may
    /// run concurrently, each with its own reconstructor; this method only
    /// shares the executing-id set. After the terminal event it waits out
    /// the grace window, then clears the transient display state.
    pub async fn execute_cell(
        &self,
        notebook_id: &str,
        request: &ExecuteRequest,
        recon: &mut ExecutionReconstructor,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let url = format!(
            "{}{}/{}/execute_cell",
            self.base_url, NOTEBOOK_PATH, notebook_id
        );
        let response = self
            .http
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(RestitchError::Network)?;

        if !response.status().is_success() {
            return Err(RestitchError::Upstream(
                response.status(),
                response.text().await.unwrap_or_default(),
            )
            .into());
        }

        self.mark_executing(&request.cell_id, true);
        let bytes = response
            .bytes_stream()
            .map(|r| r.map_err(std::io::Error::other));
        consume_execution_stream(bytes, recon, cancel).await;
        self.mark_executing(&request.cell_id, false);

        if let Some(grace) = recon.grace_period() {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(grace) => {}
            }
        }
        recon.settle();
        Ok(())
    }

    /// Cooperative cancellation primitive: asks the server to stop emitting.
    /// The read loop treats the resulting `interrupted` event or plain
    /// stream end as the terminal signal; it never aborts its own read.
    pub async fn stop_cell_execution(&self, notebook_id: &str, cell_id: &str) -> Result<bool> {
        let url = format!(
            "{}{}/{}/{}/{}",
            self.base_url, NOTEBOOK_PATH, notebook_id, STOP_CELL_PATH, cell_id
        );
        let response = self
            .http
            .post(&url)
            .send()
            .await
            .map_err(RestitchError::Network)?;

        if !response.status().is_success() {
            return Err(RestitchError::Upstream(
                response.status(),
                response.text().await.unwrap_or_default(),
            )
            .into());
        }

        let stop: StopResponse = response.json().await.map_err(RestitchError::Network)?;
        Ok(stop.success)
    }

    fn mark_executing(&self, cell_id: &str, executing: bool) {
        let mut set = match self.executing_cells.lock() {
            Ok(set) => set,
            Err(poisoned) => poisoned.into_inner(),
        };
        if executing {
            set.insert(cell_id.to_string());
        } else {
            set.remove(cell_id);
        }
    }
}
