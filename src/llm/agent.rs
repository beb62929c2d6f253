//! The bounded tool-calling loop.

use async_trait::async_trait;

use super::{ChatMessage, LanguageModel, ToolCompletionRequest};
use crate::errors::LlmError;
use crate::tools::ToolSet;

/// What the agent is asked to do.
#[derive(Debug, Clone)]
pub struct AgentRequest {
    pub system: String,
    pub prompt: String,
    pub max_steps: usize,
    pub max_tokens: u32,
}

/// One executed tool call.
#[derive(Debug, Clone)]
pub struct ToolInvocation {
    pub name: String,
    pub arguments: serde_json::Value,
    pub output: String,
    pub is_error: bool,
}

/// One model round-trip and the tool calls it issued.
#[derive(Debug, Clone)]
pub struct AgentStep {
    pub index: usize,
    pub text: Option<String>,
    pub invocations: Vec<ToolInvocation>,
}

#[derive(Debug, Clone, Default)]
pub struct AgentTranscript {
    pub steps: Vec<AgentStep>,
    pub final_text: Option<String>,
    pub input_tokens: u64,
    pub output_tokens: u64,
    /// The observer asked the loop to stop.
    pub stopped: bool,
    /// The step cap was reached while the model still wanted tools.
    pub hit_step_limit: bool,
}

impl AgentTranscript {
    pub fn tool_calls(&self) -> usize {
        self.steps.iter().map(|s| s.invocations.len()).sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepControl {
    Continue,
    Stop,
}

/// Notified after every step, before the next model request.
#[async_trait]
pub trait StepObserver: Send + Sync {
    async fn on_step(&self, step: &AgentStep) -> StepControl;
}

/// Drive `model` with `tools` for at most `request.max_steps` round-trips.
///
/// Tool failures are fed back to the model as `Error: ...` results; only
/// model API errors end the loop with `Err`.
pub async fn run_tool_loop(
    model: &dyn LanguageModel,
    tools: &ToolSet,
    request: AgentRequest,
    observer: &dyn StepObserver,
) -> Result<AgentTranscript, LlmError> {
    let definitions = tools.definitions();
    let mut messages = vec![ChatMessage::user(request.prompt)];
    let mut transcript = AgentTranscript::default();

    for index in 0..request.max_steps {
        let response = model
            .complete_with_tools(ToolCompletionRequest {
                system: request.system.clone(),
                messages: messages.clone(),
                tools: definitions.clone(),
                max_tokens: request.max_tokens,
            })
            .await?;
        transcript.input_tokens += u64::from(response.input_tokens);
        transcript.output_tokens += u64::from(response.output_tokens);

        let done = response.tool_calls.is_empty();
        messages.push(ChatMessage::assistant(
            response.content.clone(),
            response.tool_calls.clone(),
        ));

        let mut invocations = Vec::with_capacity(response.tool_calls.len());
        for call in response.tool_calls {
            let (output, is_error) = match tools.invoke(&call.name, call.arguments.clone()).await {
                Ok(output) => (output, false),
                Err(e) => (format!("Error: {}", e), true),
            };
            tracing::debug!(step = index, tool = %call.name, is_error, "tool call");
            messages.push(ChatMessage::tool_result(&call.id, output.clone(), is_error));
            invocations.push(ToolInvocation {
                name: call.name,
                arguments: call.arguments,
                output,
                is_error,
            });
        }

        let step = AgentStep {
            index,
            text: response.content.clone(),
            invocations,
        };
        let control = observer.on_step(&step).await;
        transcript.steps.push(step);

        if done {
            transcript.final_text = response.content;
            return Ok(transcript);
        }
        if control == StepControl::Stop {
            transcript.stopped = true;
            return Ok(transcript);
        }
    }

    transcript.hit_step_limit = true;
    Ok(transcript)
}
