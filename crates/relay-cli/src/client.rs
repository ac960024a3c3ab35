use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use relay_agent::AgentMode;
use relay_core::error::StreamError;
use relay_core::message::HistoryEntry;
use relay_stream::{
    consume_stream, AbortReason, CancellationController, ExecutionBlock, FrameDecoder,
    ReducerOutput, ReducerStatus, StreamReducer,
};

use crate::server::SESSION_HEADER;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRequest {
    pub prompt: String,
    pub mode: AgentMode,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub history: Vec<HistoryEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_html: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// Remote end of the stream endpoint.
pub struct StreamClient {
    http: reqwest::Client,
    server_url: String,
    malformed_budget: usize,
}

impl StreamClient {
    pub fn new(server_url: &str, malformed_budget: usize) -> Self {
        Self {
            http: reqwest::Client::new(),
            server_url: server_url.trim_end_matches('/').to_string(),
            malformed_budget,
        }
    }

    /// Streams one turn sequence, folding frames into blocks as they arrive.
    ///
    /// `interrupt` stops the read locally; the reducer is finalized with the
    /// partial state and the server is asked to stop the sequence. Read and
    /// parse failures end up in the output as an errored status.
    pub async fn run(
        &self,
        request: &RunRequest,
        observer: impl FnMut(&[ExecutionBlock]) + Send + 'static,
        interrupt: CancellationToken,
    ) -> Result<ReducerOutput> {
        let resp = self
            .http
            .post(format!("{}/api/agent/stream", self.server_url))
            .json(request)
            .send()
            .await
            .with_context(|| format!("connecting to {}", self.server_url))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body: serde_json::Value = resp.json().await.unwrap_or_default();
            let message = body["error"].as_str().unwrap_or("request rejected");
            return Err(StreamError::Http {
                status: status.as_u16(),
                message: message.to_string(),
            }
            .into());
        }

        let header_id = resp
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        tracing::debug!(session_id = %header_id, "stream accepted");

        let controller = Arc::new(CancellationController::new(header_id.clone()));
        controller.begin();
        let watcher = {
            let controller = controller.clone();
            let interrupt = interrupt.clone();
            tokio::spawn(async move {
                interrupt.cancelled().await;
                controller.abort(AbortReason::UserStop).await;
            })
        };

        let mut reducer = StreamReducer::new().with_observer(observer);
        let mut decoder = FrameDecoder::new(self.malformed_budget);
        let consumed = consume_stream(
            resp.bytes_stream(),
            &mut reducer,
            &mut decoder,
            &controller.read_token(),
        )
        .await;
        watcher.abort();

        let session_id = abort_target(reducer.session_id(), &header_id);
        let status = reducer.status();
        if status == ReducerStatus::Aborted {
            self.request_abort(&session_id).await;
        } else {
            controller.finish(status == ReducerStatus::Completed);
        }
        if decoder.malformed_count() > 0 {
            tracing::warn!(skipped = decoder.malformed_count(), "malformed frames skipped");
        }

        if let Err(e) = consumed {
            tracing::warn!(session_id = %session_id, "stream failed: {e}");
        }
        Ok(reducer.finish())
    }

    async fn request_abort(&self, session_id: &str) {
        if session_id.is_empty() {
            return;
        }
        let sent = self
            .http
            .post(format!("{}/api/agent/abort", self.server_url))
            .json(&serde_json::json!({ "sessionId": session_id }))
            .send()
            .await;
        match sent {
            Ok(resp) => {
                let body: serde_json::Value = resp.json().await.unwrap_or_default();
                tracing::info!(session_id, success = %body["success"], "abort requested");
            }
            Err(e) => tracing::warn!(session_id, "abort request failed: {e}"),
        }
    }
}

/// The id announced by `agent_start` names the sequence; the response
/// header is only used when the stream ended before announcing one.
pub(crate) fn abort_target(announced: Option<&str>, header_id: &str) -> String {
    announced
        .filter(|id| !id.is_empty())
        .unwrap_or(header_id)
        .to_string()
}
