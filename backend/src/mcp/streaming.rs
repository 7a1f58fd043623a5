//! Server-Sent Events delivery of tracked tool calls.
//!
//! A streamed `tools/call` becomes a task. The stream always opens with a
//! `connection` event, relays each progress report as a `progress` event and
//! ends with a `result` or `error` event, after which the response closes.
//! Every event is recorded in the session's event log before it is written,
//! so a client that drops off can replay it later.
//!
//! Losing the client does not stop the work: the executor keeps running,
//! events keep being recorded and the task still reaches a terminal state.
//! Frames are never awaited on. A client that stops reading until the
//! buffer is full is treated as gone and has to resume with `Last-Event-ID`.

use axum::response::sse::{Event, KeepAlive, KeepAliveStream, Sse};
use futures::FutureExt;
use serde_json::{json, Value};
use std::convert::Infallible;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tether_types::{ConnectionStatus, StreamEvent, StreamEventType};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::executor::{ProgressReporter, ProgressUpdate, RequestExecutor};
use super::protocol::{codes, JsonRpcRequest, JsonRpcResponse};
use super::session::SessionHandle;
use crate::state::AppState;

/// SSE response body of a tracked tool call.
pub type EventStream = Sse<KeepAliveStream<ReceiverStream<Result<Event, Infallible>>>>;

/// Frames buffered between the driver and the HTTP body.
const STREAM_BUFFER: usize = 32;

/// Render a stream event as an SSE frame: `id: <id>\ndata: <json>\n\n`.
pub fn frame(event: &StreamEvent) -> Event {
    let json = match serde_json::to_string(event) {
        Ok(json) => json,
        Err(e) => {
            warn!("MCP: Could not serialize event {}: {}", event.id, e);
            String::new()
        }
    };
    Event::default().id(&event.id).data(json)
}

/// Start a tracked tool call and return its event stream.
///
/// The task and the `connection` event are recorded before this returns;
/// the executor runs on a spawned task.
pub async fn open_stream(
    state: &AppState,
    session: SessionHandle,
    request: JsonRpcRequest,
    tool: String,
) -> EventStream {
    let task_id = Uuid::new_v4().to_string();

    let (session_id, connection) = {
        let mut guard = session.lock().await;
        if let Err(e) = guard.tasks.create_task(task_id.clone(), tool.clone()) {
            warn!("MCP: Could not register task {}: {}", task_id, e);
        }
        let connection = guard.events.record(
            StreamEventType::Connection,
            json!({
                "status": "connected",
                "taskId": task_id,
                "tool": tool,
                "requestId": request.id,
            }),
        );
        (guard.id().to_string(), connection)
    };

    info!(
        "MCP: SSE stream opened for session {} (tool {}, task {})",
        session_id, tool, task_id
    );

    let (tx, rx) = mpsc::channel(STREAM_BUFFER);
    let driver = StreamDriver {
        session,
        session_id,
        task_id,
        tool,
        request_id: request.id.clone(),
        sink: SseSink {
            tx,
            gone: CancellationToken::new(),
        },
    };
    let executor = state.executor().clone();
    let deadline = state.streaming().task_deadline;
    tokio::spawn(driver.run(executor, request, connection, deadline));

    Sse::new(ReceiverStream::new(rx))
        .keep_alive(KeepAlive::new().interval(state.streaming().keep_alive))
}

/// What happened to a frame handed to the sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Delivery {
    Sent,
    /// Buffer full: the client is not reading
    Lagging,
    Closed,
}

/// Writing half of one SSE response.
struct SseSink {
    tx: mpsc::Sender<Result<Event, Infallible>>,
    /// Cancelled once the client is known to be gone
    gone: CancellationToken,
}

impl SseSink {
    fn is_gone(&self) -> bool {
        self.gone.is_cancelled()
    }

    /// Resolves when the HTTP body has been dropped.
    async fn closed(&self) {
        self.tx.closed().await
    }

    /// Queue one frame without waiting for the client.
    fn send(&self, event: &StreamEvent) -> Delivery {
        if self.is_gone() {
            return Delivery::Closed;
        }
        match self.tx.try_send(Ok(frame(event))) {
            Ok(()) => Delivery::Sent,
            Err(mpsc::error::TrySendError::Full(_)) => Delivery::Lagging,
            Err(mpsc::error::TrySendError::Closed(_)) => Delivery::Closed,
        }
    }
}

struct StreamDriver {
    session: SessionHandle,
    session_id: String,
    task_id: String,
    tool: String,
    request_id: Option<Value>,
    sink: SseSink,
}

impl StreamDriver {
    async fn run(
        self,
        executor: Arc<dyn RequestExecutor>,
        request: JsonRpcRequest,
        connection: StreamEvent,
        deadline: Option<Duration>,
    ) {
        self.emit(&connection).await;

        let (reporter, mut updates) = ProgressReporter::channel();
        let call = execute(executor.as_ref(), &request, &reporter, deadline);
        tokio::pin!(call);

        let outcome = loop {
            tokio::select! {
                biased;
                Some(update) = updates.recv() => self.on_progress(update).await,
                _ = self.sink.closed(), if !self.sink.is_gone() => {
                    self.on_client_gone(Delivery::Closed).await
                }
                outcome = &mut call => break outcome,
            }
        };
        // Reports sent just before the call returned
        while let Ok(update) = updates.try_recv() {
            self.on_progress(update).await;
        }

        self.on_finish(outcome).await;
        debug!(
            "MCP: SSE stream closed for session {} (task {})",
            self.session_id, self.task_id
        );
    }

    async fn emit(&self, event: &StreamEvent) {
        match self.sink.send(event) {
            Delivery::Sent => {}
            lost => self.on_client_gone(lost).await,
        }
    }

    async fn on_client_gone(&self, reason: Delivery) {
        if self.sink.is_gone() {
            return;
        }
        self.sink.gone.cancel();
        if reason == Delivery::Lagging {
            warn!(
                "MCP: Client of session {} stopped reading; writing no more frames for task {}",
                self.session_id, self.task_id
            );
        } else {
            info!(
                "MCP: Client disconnected from session {}; task {} keeps running",
                self.session_id, self.task_id
            );
        }
        self.session
            .lock()
            .await
            .set_connection_status(ConnectionStatus::Disconnected);
    }

    async fn on_progress(&self, update: ProgressUpdate) {
        let event = {
            let mut session = self.session.lock().await;
            let checkpoint = match session.tasks.update_progress(
                &self.task_id,
                update.progress,
                update.phase,
                update.data.clone(),
            ) {
                Ok(Some(checkpoint)) => checkpoint,
                Ok(None) => return,
                Err(e) => {
                    warn!("MCP: Dropping progress for task {}: {}", self.task_id, e);
                    return;
                }
            };
            session.events.record(
                StreamEventType::Progress,
                json!({
                    "taskId": self.task_id,
                    "tool": self.tool,
                    "progress": checkpoint.progress,
                    "phase": checkpoint.phase,
                    "checkpointId": checkpoint.id,
                    "data": update.data,
                }),
            )
        };
        self.emit(&event).await;
    }

    async fn on_finish(&self, outcome: Result<Value, String>) {
        let event = {
            let mut session = self.session.lock().await;
            match outcome {
                Ok(value) => {
                    let response = JsonRpcResponse::success(self.request_id.clone(), value.clone());
                    match session.tasks.complete(&self.task_id, value) {
                        Ok(true) => {}
                        Ok(false) => return,
                        Err(e) => warn!("MCP: Completing task {}: {}", self.task_id, e),
                    }
                    session.events.record(
                        StreamEventType::Result,
                        json!({
                            "taskId": self.task_id,
                            "tool": self.tool,
                            "progress": 1.0,
                            "response": response,
                        }),
                    )
                }
                Err(message) => {
                    let response = JsonRpcResponse::error(
                        self.request_id.clone(),
                        codes::INTERNAL_ERROR,
                        format!("Tool call failed: {message}"),
                    );
                    match session.tasks.fail(&self.task_id, message.clone()) {
                        Ok(true) => {}
                        Ok(false) => return,
                        Err(e) => warn!("MCP: Failing task {}: {}", self.task_id, e),
                    }
                    session.events.record(
                        StreamEventType::Error,
                        json!({
                            "taskId": self.task_id,
                            "tool": self.tool,
                            "error": { "code": codes::INTERNAL_ERROR, "message": message },
                            "response": response,
                        }),
                    )
                }
            }
        };
        self.emit(&event).await;
    }
}

/// Run the executor, converting errors, panics and deadline overruns into
/// a failure message.
async fn execute(
    executor: &dyn RequestExecutor,
    request: &JsonRpcRequest,
    reporter: &ProgressReporter,
    deadline: Option<Duration>,
) -> Result<Value, String> {
    let call = AssertUnwindSafe(executor.execute(request, reporter)).catch_unwind();
    let result = match deadline {
        Some(limit) => match tokio::time::timeout(limit, call).await {
            Ok(result) => result,
            Err(_) => {
                return Err(format!(
                    "task deadline exceeded after {}s",
                    limit.as_secs_f64()
                ))
            }
        },
        None => call.await,
    };
    match result {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(format!("{e:#}")),
        Err(_) => Err("executor panicked".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::response::IntoResponse;
    use chrono::Utc;

    fn event(id: &str, event_type: StreamEventType, data: Value) -> StreamEvent {
        StreamEvent {
            id: id.to_string(),
            event_type,
            data,
            timestamp: Utc::now(),
            session_id: "s1".to_string(),
        }
    }

    #[tokio::test]
    async fn test_frame_layout() {
        let event = event("evt-7", StreamEventType::Progress, json!({ "progress": 0.5 }));
        let expected = format!(
            "id: evt-7\ndata: {}\n\n",
            serde_json::to_string(&event).unwrap()
        );

        let body = Sse::new(futures::stream::iter(vec![Ok::<_, Infallible>(frame(&event))]))
            .into_response()
            .into_body();
        let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();

        assert_eq!(std::str::from_utf8(&bytes).unwrap(), expected);
    }

    #[tokio::test]
    async fn test_sink_reports_lagging_client() {
        let (tx, mut rx) = mpsc::channel(1);
        let sink = SseSink {
            tx,
            gone: CancellationToken::new(),
        };
        let first = event("evt-1", StreamEventType::Connection, json!({}));
        let second = event("evt-2", StreamEventType::Progress, json!({}));

        assert_eq!(sink.send(&first), Delivery::Sent);
        assert_eq!(sink.send(&second), Delivery::Lagging);

        assert!(rx.recv().await.is_some());
        drop(rx);
        assert_eq!(sink.send(&second), Delivery::Closed);

        sink.gone.cancel();
        assert_eq!(sink.send(&first), Delivery::Closed);
    }
}
