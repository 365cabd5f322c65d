//! Tool-calling loop for one session.
//!
//! Each turn sends the accumulated conversation and the tool schemas to the
//! inference backend through the [`AdmissionQueue`]. Requested tool calls
//! run as detached tasks so cancellation can abandon an in-flight call
//! without waiting on it. The terminal status is written before the
//! terminal event is published, so a status read that follows the event
//! is already terminal.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::config::RunnerConfig;
use crate::coordination::admission::AdmissionQueue;
use crate::events::SessionPublisher;
use crate::models::event::{EventPayload, MessageContent};
use crate::models::session::{Session, SessionStatus};
use crate::models::tool::{ToolCall, ToolInvocation, ToolOutcome};
use crate::persistence::session_repo::SessionRepo;

use super::inference::{ChatMessage, InferenceBackend, InferenceRequest, InferenceResponse};
use super::tools::ToolRegistry;

/// What a finished run looked like.
#[derive(Debug, Clone)]
pub struct RunSummary {
    /// Terminal status reached.
    pub status: SessionStatus,
    /// Inference rounds completed, including rounds from earlier runs.
    pub total_turns: u32,
    /// Working transcript of tool invocations. Kept in memory only.
    pub invocations: Vec<ToolInvocation>,
}

/// Outcome of one inference step, before it is folded into the loop.
enum Step {
    Response(InferenceResponse),
    Cancelled,
    Failed(String),
}

/// Drives sessions from initial prompt to terminal status.
#[derive(Clone)]
pub struct SessionRunner {
    inference: Arc<dyn InferenceBackend>,
    tools: Arc<ToolRegistry>,
    admission: AdmissionQueue,
    sessions: SessionRepo,
    max_tool_iterations: u32,
    tool_timeout: Option<Duration>,
}

/// Per-run mutable state.
struct RunState {
    session: Session,
    publisher: SessionPublisher,
    transcript: Vec<ChatMessage>,
    invocations: Vec<ToolInvocation>,
    tool_calls: u32,
}

impl SessionRunner {
    /// Create a runner.
    #[must_use]
    pub fn new(
        inference: Arc<dyn InferenceBackend>,
        tools: Arc<ToolRegistry>,
        admission: AdmissionQueue,
        sessions: SessionRepo,
        config: &RunnerConfig,
    ) -> Self {
        Self {
            inference,
            tools,
            admission,
            sessions,
            max_tool_iterations: config.max_tool_iterations,
            tool_timeout: config.tool_timeout(),
        }
    }

    /// Run `session` until it reaches a terminal status.
    ///
    /// Never returns an error: tool failures are fed back to the model,
    /// inference failures and the iteration cap end the session as
    /// `error`, and cancellation ends it as `stopped`.
    pub async fn run(
        &self,
        session: Session,
        initial_prompt: String,
        publisher: SessionPublisher,
        cancel: CancellationToken,
    ) -> RunSummary {
        let span = info_span!(
            "session_run",
            session_id = %session.id,
            agent_id = %session.agent_id
        );

        let state = RunState {
            session,
            publisher,
            transcript: vec![ChatMessage::user(initial_prompt)],
            invocations: Vec::new(),
            tool_calls: 0,
        };
        self.drive(state, cancel).instrument(span).await
    }

    async fn drive(&self, mut state: RunState, cancel: CancellationToken) -> RunSummary {
        info!("session loop started");

        loop {
            if cancel.is_cancelled() {
                return self.stop(state, "cancelled between turns").await;
            }

            let response = match self.infer(&state, &cancel).await {
                Step::Response(response) => response,
                Step::Cancelled => return self.stop(state, "cancelled during inference").await,
                Step::Failed(message) => return self.fail(state, message).await,
            };

            state.session.total_turns += 1;
            if let Err(err) = self
                .sessions
                .record_turns(&state.session.id, state.session.total_turns)
                .await
            {
                warn!(%err, "failed to record turn count");
            }

            if let Some(thinking) = response.thinking.filter(|t| !t.is_empty()) {
                state.publisher.emit(EventPayload::Thinking { text: thinking });
            }

            if response.tool_calls.is_empty() {
                return self.finish(state, response.content).await;
            }

            if !response.content.is_empty() {
                state.publisher.emit(EventPayload::Assistant {
                    content: MessageContent::Text(response.content.clone()),
                });
            }
            state.transcript.push(ChatMessage::assistant(
                response.content,
                response.tool_calls.clone(),
            ));

            for call in response.tool_calls {
                if cancel.is_cancelled() {
                    return self.stop(state, "cancelled before tool call").await;
                }
                if state.tool_calls >= self.max_tool_iterations {
                    let message = format!(
                        "exceeded maximum of {} tool iterations; refusing call to `{}`",
                        self.max_tool_iterations, call.name
                    );
                    return self.fail(state, message).await;
                }
                state.tool_calls += 1;

                state.publisher.emit(EventPayload::ToolStatus {
                    status_message: format!("Running tool `{}`", call.name),
                });

                let tool_name = call.name.clone();
                let invocation = tokio::select! {
                    biased;
                    () = cancel.cancelled() => {
                        debug!(tool = %tool_name, "abandoning in-flight tool call");
                        return self.stop(state, "cancelled during tool call").await;
                    }
                    invocation = self.invoke(call) => invocation,
                };

                if let ToolOutcome::Failure { error_message } = &invocation.outcome {
                    warn!(
                        tool = %invocation.name,
                        error = %error_message,
                        "tool call failed, returning error to model"
                    );
                    state.publisher.emit(EventPayload::ToolStatus {
                        status_message: format!("Tool `{}` failed: {error_message}", invocation.name),
                    });
                }

                state.transcript.push(ChatMessage::tool_result(
                    invocation.call_id.clone(),
                    invocation.outcome.transcript_text(),
                ));
                state.invocations.push(invocation);
            }
        }
    }

    /// One inference round under the admission slot, racing cancellation.
    ///
    /// Dropping the admission future on cancel releases the slot or the
    /// queue position.
    async fn infer(&self, state: &RunState, cancel: &CancellationToken) -> Step {
        let request = InferenceRequest {
            session_id: state.session.id.clone(),
            agent_id: state.session.agent_id.clone(),
            messages: state.transcript.clone(),
            tools: self.tools.schemas(),
        };

        tokio::select! {
            biased;
            () = cancel.cancelled() => Step::Cancelled,
            result = self.admission.run(self.inference.complete(request)) => match result {
                Ok(response) => Step::Response(response),
                Err(err) => Step::Failed(format!("inference failed: {err}")),
            },
        }
    }

    /// Invoke one tool call on its own task.
    ///
    /// The task is aborted when the call times out. On cancellation the
    /// caller drops this future and the task is left to finish on its own.
    async fn invoke(&self, call: ToolCall) -> ToolInvocation {
        let started = Instant::now();
        let outcome = match self.tools.get(&call.name) {
            None => ToolOutcome::Failure {
                error_message: format!("unknown tool: {}", call.name),
            },
            Some(tool) => {
                let handle = tokio::spawn(tool.invoke(call.arguments.clone()));
                let abort = handle.abort_handle();
                let joined = match self.tool_timeout {
                    Some(limit) => match tokio::time::timeout(limit, handle).await {
                        Ok(joined) => joined,
                        Err(_) => {
                            abort.abort();
                            return ToolInvocation {
                                call_id: call.id,
                                name: call.name,
                                arguments: call.arguments,
                                outcome: ToolOutcome::Failure {
                                    error_message: format!(
                                        "timed out after {}s",
                                        limit.as_secs()
                                    ),
                                },
                                duration_ms: elapsed_ms(started),
                            };
                        }
                    },
                    None => handle.await,
                };
                match joined {
                    Ok(Ok(result)) => ToolOutcome::Success { result },
                    Ok(Err(err)) => ToolOutcome::Failure {
                        error_message: err.to_string(),
                    },
                    Err(join_err) => ToolOutcome::Failure {
                        error_message: format!("tool task aborted: {join_err}"),
                    },
                }
            }
        };

        ToolInvocation {
            call_id: call.id,
            name: call.name,
            arguments: call.arguments,
            outcome,
            duration_ms: elapsed_ms(started),
        }
    }

    async fn finish(&self, mut state: RunState, content: String) -> RunSummary {
        if !content.is_empty() {
            state.publisher.emit(EventPayload::Assistant {
                content: MessageContent::Text(content.clone()),
            });
        }
        info!(total_turns = state.session.total_turns, "session idle with final answer");
        self.settle(state, SessionStatus::Idle, EventPayload::Result { content })
            .await
    }

    async fn fail(&self, state: RunState, message: String) -> RunSummary {
        warn!(error = %message, "session ended in error");
        self.settle(state, SessionStatus::Error, EventPayload::Error { message })
            .await
    }

    async fn stop(&self, state: RunState, reason: &str) -> RunSummary {
        info!(reason, "session stopped");
        let payload = EventPayload::SessionExited {
            reason: reason.to_owned(),
        };
        self.settle(state, SessionStatus::Stopped, payload).await
    }

    /// The terminal status is persisted before the terminal event goes out.
    async fn settle(
        &self,
        mut state: RunState,
        status: SessionStatus,
        terminal: EventPayload,
    ) -> RunSummary {
        if let Err(err) = self.sessions.update_status(&state.session.id, status).await {
            warn!(%err, status = status.as_str(), "failed to persist terminal status");
        }
        state.session.status = status;
        state.publisher.emit(terminal);

        RunSummary {
            status,
            total_turns: state.session.total_turns,
            invocations: state.invocations,
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
