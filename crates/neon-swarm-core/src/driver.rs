//! Turn loop: ask the active agent's model for tool calls, run them, fold
//! the results back, repeat until the model answers in text

use anyhow::{Result, anyhow};
use tracing::{debug, info, warn};

use crate::agents::AgentRole;
use crate::api::{ApiMessage, CompletionModel, ContentBlock, MessageContent, Usage};
use crate::session::{Session, ToolCall};

pub const DEFAULT_MAX_ITERATIONS: usize = 10;
const MAX_TOOL_OUTPUT: usize = 100_000;

/// Final answer of one user turn
#[derive(Debug, Clone)]
pub struct TurnOutput {
    pub text: String,
    pub usage: Usage,
    pub tool_calls: usize,
    /// Role in control when the turn ended
    pub agent: AgentRole,
}

/// Run one user turn to completion.
///
/// `history` carries the conversation across turns and is extended in
/// place. The system prompt and tool list are taken from whichever agent is
/// active at the start of each model request, so a handoff applies from the
/// next request on.
///
/// If the turn fails, `history` keeps every tool call that already ran with
/// its result, so the model still learns what changed. Only the unanswered
/// tail is dropped.
pub async fn run_turn(
    model: &dyn CompletionModel,
    session: &mut Session,
    history: &mut Vec<ApiMessage>,
    input: &str,
    max_iterations: usize,
) -> Result<TurnOutput> {
    let checkpoint = history.len();
    history.push(ApiMessage::user(input));

    let result = tool_loop(model, session, history, max_iterations).await;
    if result.is_err() {
        settle_history(history, checkpoint);
    }
    result
}

/// Cut a failed turn back to its last completed tool exchange, or to
/// `checkpoint` when no tool ran.
fn settle_history(history: &mut Vec<ApiMessage>, checkpoint: usize) {
    let keep = history
        .get(checkpoint..)
        .and_then(|turn| turn.iter().rposition(is_tool_results))
        .map(|last| checkpoint + last + 1)
        .unwrap_or(checkpoint);
    if keep < history.len() {
        debug!("Dropping {} unanswered messages", history.len() - keep);
        history.truncate(keep);
    }
}

fn is_tool_results(message: &ApiMessage) -> bool {
    message.role == "user"
        && matches!(
            &message.content,
            MessageContent::Blocks(blocks)
                if blocks.iter().any(|b| matches!(b, ContentBlock::ToolResult { .. }))
        )
}

async fn tool_loop(
    model: &dyn CompletionModel,
    session: &mut Session,
    history: &mut Vec<ApiMessage>,
    max_iterations: usize,
) -> Result<TurnOutput> {
    let mut usage = Usage::default();
    let mut tool_calls = 0;
    let mut iterations = 0;

    loop {
        iterations += 1;
        if iterations > max_iterations {
            warn!("Tool loop exceeded maximum iterations ({})", max_iterations);
            return Err(anyhow!("Tool loop exceeded maximum iterations ({})", max_iterations));
        }

        let system = session.instructions();
        let tools = session.tool_definitions();
        debug!(
            "Tool loop iteration {} as {} ({} tools)",
            iterations,
            session.active_agent().name(),
            tools.len()
        );

        let response = model.complete(history, &tools, &system).await?;
        usage.input_tokens += response.usage.input_tokens;
        usage.output_tokens += response.usage.output_tokens;
        history.push(ApiMessage::assistant(response.content.clone()));

        match response.stop_reason.as_deref() {
            Some("tool_use") => {
                let calls: Vec<ToolCall> = response
                    .content
                    .iter()
                    .filter_map(|block| match block {
                        ContentBlock::ToolUse { id, name, input } => {
                            Some(ToolCall::new(id.clone(), name.clone(), input.clone()))
                        }
                        _ => None,
                    })
                    .collect();

                if calls.is_empty() {
                    warn!("Stop reason was tool_use but no tool calls found");
                    return Err(anyhow!("Stop reason was tool_use but no tool calls found"));
                }

                tool_calls += calls.len();
                for call in &calls {
                    info!("Executing tool: {}", call.name);
                }

                let blocks = session
                    .run_batch(calls)
                    .await
                    .into_iter()
                    .map(|result| {
                        let (content, is_error) = result.render();
                        ContentBlock::ToolResult {
                            tool_use_id: result.id,
                            content: truncate_output(content),
                            is_error,
                        }
                    })
                    .collect();
                history.push(ApiMessage::tool_results(blocks));
            }
            Some("end_turn") | Some("stop_sequence") | Some("max_tokens") | None => {
                let text = response
                    .content
                    .iter()
                    .filter_map(|block| match block {
                        ContentBlock::Text { text } => Some(text.as_str()),
                        _ => None,
                    })
                    .collect::<Vec<_>>()
                    .join("\n");

                if text.is_empty() {
                    return Err(anyhow!("No text response from assistant"));
                }

                debug!(
                    "Tool loop completed (iterations: {}, tokens: in={} out={})",
                    iterations, usage.input_tokens, usage.output_tokens
                );
                return Ok(TurnOutput {
                    text,
                    usage,
                    tool_calls,
                    agent: session.active_role(),
                });
            }
            Some(other) => {
                warn!("Unexpected stop_reason: {}", other);
                return Err(anyhow!("Unexpected stop_reason: {}", other));
            }
        }
    }
}

/// Cap oversized tool output on a char boundary
fn truncate_output(mut content: String) -> String {
    if content.len() > MAX_TOOL_OUTPUT {
        let mut cut = MAX_TOOL_OUTPUT;
        while !content.is_char_boundary(cut) {
            cut -= 1;
        }
        content.truncate(cut);
        content.push_str("\n[Output truncated]");
    }
    content
}
