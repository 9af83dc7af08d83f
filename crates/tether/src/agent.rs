use anyhow::Result;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;

use crate::errors::{AgentError, AgentResult};
use crate::models::content::Content;
use crate::models::message::{Message, ToolRequest};
use crate::models::tool::Tool;
use crate::prompt_template::render_builtin;
use crate::registry::{RegistryError, SourceInfo, ToolRegistry};
use crate::providers::base::Provider;
use crate::session::{Session, SessionError};
use crate::stream::{MessageAssembler, StreamEvent};
use crate::toolkit::Toolkit;

#[derive(Serialize)]
struct PromptContext {
    tools: Vec<Tool>,
    sources: Vec<SourceInfo>,
}

/// Drives one conversation: model inference in, tool execution out, until
/// the model produces a turn with no tool calls.
///
/// All collaborators are injected: the inference provider, the registry
/// of callable tools, and an optional event tap for live output. There is
/// no global state.
pub struct Agent {
    provider: Box<dyn Provider>,
    registry: ToolRegistry,
    system_prompt: Option<String>,
    max_turns: Option<usize>,
    event_tap: Option<UnboundedSender<StreamEvent>>,
}

impl Agent {
    pub fn new(provider: Box<dyn Provider>) -> Self {
        Self {
            provider,
            registry: ToolRegistry::new(),
            system_prompt: None,
            max_turns: None,
            event_tap: None,
        }
    }

    /// Register an in-process toolkit.
    pub fn register_toolkit(&mut self, toolkit: Arc<dyn Toolkit>) -> Result<(), RegistryError> {
        self.registry.register_toolkit(toolkit)
    }

    /// Register the tools discovered by an open session.
    pub fn register_session(&mut self, session: Arc<Session>) -> Result<(), RegistryError> {
        self.registry.register_session(session)
    }

    /// Replace the rendered default system instruction with a fixed one.
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// Bound the number of model turns per reply. Unbounded by default;
    /// exceeding the bound aborts the reply with
    /// [`AgentError::TurnLimitExceeded`].
    pub fn with_max_turns(mut self, max_turns: usize) -> Self {
        self.max_turns = Some(max_turns);
        self
    }

    /// Mirror every provider stream event to `tap` for concurrent display.
    pub fn with_event_tap(mut self, tap: UnboundedSender<StreamEvent>) -> Self {
        self.event_tap = Some(tap);
        self
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    fn render_system_prompt(&self) -> AgentResult<String> {
        if let Some(prompt) = &self.system_prompt {
            return Ok(prompt.clone());
        }
        let context = PromptContext {
            tools: self.registry.list(),
            sources: self.registry.sources().to_vec(),
        };
        render_builtin("system.md", &context).map_err(|e| AgentError::Internal(e.to_string()))
    }

    /// Run one user turn to its fixpoint, yielding each message as it is
    /// appended: the assistant's responses and the tool results they
    /// trigger, ending with an assistant message that carries no tool calls.
    ///
    /// Only fully-completed steps are yielded; a fatal error (provider
    /// failure, transport loss) aborts the stream without emitting partial
    /// tool results.
    pub async fn reply(&self, messages: &[Message]) -> Result<BoxStream<'_, Result<Message>>> {
        let mut messages = messages.to_vec();
        let tools = self.registry.list();
        let system_prompt = self.render_system_prompt()?;

        Ok(Box::pin(async_stream::try_stream! {
            let mut turn = 0usize;
            loop {
                if let Some(max_turns) = self.max_turns {
                    if turn >= max_turns {
                        Err::<(), AgentError>(AgentError::TurnLimitExceeded(max_turns))?;
                    }
                }
                turn += 1;
                tracing::debug!(turn, "requesting completion");

                let mut stream = self.provider.stream(&system_prompt, &messages, &tools).await?;
                let mut assembler = MessageAssembler::new();
                while let Some(event) = stream.next().await {
                    let event = event?;
                    if let Some(tap) = &self.event_tap {
                        // A gone receiver only means nobody is watching.
                        let _ = tap.send(event.clone());
                    }
                    assembler.push(&event);
                }

                let response = assembler.finish();
                messages.push(response.clone());
                yield response.clone();

                // Let the consumer observe the response before tool
                // execution starts.
                tokio::task::yield_now().await;

                let requests: Vec<ToolRequest> = response
                    .tool_requests()
                    .into_iter()
                    .cloned()
                    .collect();

                if requests.is_empty() {
                    tracing::debug!(turn, "reply complete");
                    break;
                }

                tracing::debug!(count = requests.len(), "executing tool calls");
                let futures: Vec<_> = requests
                    .iter()
                    .map(|request| self.dispatch(request))
                    .collect();
                let outputs = futures::future::join_all(futures).await;

                // Surface a fatal failure before appending anything, so the
                // thread never holds a partial tool round.
                let mut results: Vec<AgentResult<Vec<Content>>> = Vec::with_capacity(outputs.len());
                for output in outputs {
                    results.push(output?);
                }

                // join_all preserved issuance order regardless of which
                // call finished first.
                for (request, result) in requests.iter().zip(results) {
                    let message = Message::tool().with_tool_response(request.id.clone(), result);
                    messages.push(message.clone());
                    yield message;
                }
            }
        }))
    }

    async fn dispatch(
        &self,
        request: &ToolRequest,
    ) -> Result<AgentResult<Vec<Content>>, SessionError> {
        match &request.tool_call {
            Ok(call) => self.registry.dispatch(call).await,
            // The request itself was malformed; reflect it back as data.
            Err(e) => Ok(Err(e.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::message::MessageContent;
    use crate::models::role::Role;
    use crate::models::tool::ToolCall;
    use crate::providers::mock::MockProvider;
    use crate::toolkit::DemoToolkit;
    use async_trait::async_trait;
    use futures::TryStreamExt;
    use serde_json::json;
    use std::time::Duration;

    async fn collect(agent: &Agent, messages: Vec<Message>) -> Result<Vec<Message>> {
        let mut stream = agent.reply(&messages).await?;
        let mut collected = Vec::new();
        while let Some(message) = stream.try_next().await? {
            collected.push(message);
        }
        Ok(collected)
    }

    #[tokio::test]
    async fn test_simple_response() -> Result<()> {
        let provider = MockProvider::new(vec![Message::assistant().with_text("Hello!")]);
        let agent = Agent::new(Box::new(provider));

        let messages = collect(&agent, vec![Message::user().with_text("Hi")]).await?;
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].text(), "Hello!");
        Ok(())
    }

    #[tokio::test]
    async fn test_tool_call_round_trip() -> Result<()> {
        let provider = MockProvider::new(vec![
            Message::assistant().with_tool_request(
                "call_1",
                Ok(ToolCall::new("count_words", json!({"text": "one two three"}))),
            ),
            Message::assistant().with_text("Three words."),
        ]);
        let mut agent = Agent::new(Box::new(provider));
        agent.register_toolkit(Arc::new(DemoToolkit::new()))?;

        let messages = collect(&agent, vec![Message::user().with_text("count these")]).await?;

        // assistant request, tool result, final answer
        assert_eq!(messages.len(), 3);
        assert!(messages[0]
            .content
            .iter()
            .any(|c| matches!(c, MessageContent::ToolRequest(_))));
        assert_eq!(messages[1].role, Role::Tool);
        let response = messages[1].content[0].as_tool_response().unwrap();
        assert_eq!(response.id, "call_1");
        let contents = response.tool_result.as_ref().unwrap();
        assert_eq!(contents[0].as_text().unwrap(), r#"{"count":3}"#);
        assert_eq!(messages[2].text(), "Three words.");
        Ok(())
    }

    #[tokio::test]
    async fn test_unknown_tool_flows_back_as_data() -> Result<()> {
        let provider = MockProvider::new(vec![
            Message::assistant()
                .with_tool_request("call_1", Ok(ToolCall::new("fetch_weather", json!({})))),
            Message::assistant().with_text("I don't have that tool, sorry."),
        ]);
        let mut agent = Agent::new(Box::new(provider));
        agent.register_toolkit(Arc::new(DemoToolkit::new()))?;

        let messages = collect(&agent, vec![Message::user().with_text("weather?")]).await?;

        assert_eq!(messages.len(), 3);
        let response = messages[1].content[0].as_tool_response().unwrap();
        assert!(matches!(
            response.tool_result,
            Err(AgentError::ToolNotFound(_))
        ));
        assert_eq!(messages[2].text(), "I don't have that tool, sorry.");
        Ok(())
    }

    #[tokio::test]
    async fn test_one_result_per_request() -> Result<()> {
        let provider = MockProvider::new(vec![
            Message::assistant()
                .with_tool_request(
                    "call_1",
                    Ok(ToolCall::new("count_words", json!({"text": "a"}))),
                )
                .with_tool_request(
                    "call_2",
                    Ok(ToolCall::new("count_words", json!({"text": "a b"}))),
                ),
            Message::assistant().with_text("Done."),
        ]);
        let mut agent = Agent::new(Box::new(provider));
        agent.register_toolkit(Arc::new(DemoToolkit::new()))?;

        let messages = collect(&agent, vec![Message::user().with_text("count twice")]).await?;

        // one assistant, one tool message per request, one final answer
        assert_eq!(messages.len(), 4);
        let request_count = messages[0].tool_requests().len();
        let result_ids: Vec<String> = messages[1..3]
            .iter()
            .map(|m| m.content[0].as_tool_response().unwrap().id.clone())
            .collect();
        assert_eq!(request_count, result_ids.len());
        assert_eq!(result_ids, vec!["call_1", "call_2"]);
        Ok(())
    }

    // Toolkit whose first tool finishes long after its second; used to
    // check that thread order follows issuance order, not completion order.
    struct StaggeredToolkit {
        tools: Vec<Tool>,
    }

    impl StaggeredToolkit {
        fn new() -> Self {
            let schema = json!({"type": "object"});
            Self {
                tools: vec![
                    Tool::new("slow", "finishes last", schema.clone()),
                    Tool::new("fast", "finishes first", schema),
                ],
            }
        }
    }

    #[async_trait]
    impl Toolkit for StaggeredToolkit {
        fn name(&self) -> &str {
            "staggered"
        }

        fn description(&self) -> &str {
            "tools with different latencies"
        }

        fn tools(&self) -> &[Tool] {
            &self.tools
        }

        async fn call(&self, tool_call: ToolCall) -> AgentResult<Vec<Content>> {
            match tool_call.name.as_str() {
                "slow" => {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok(vec![Content::text("slow done")])
                }
                "fast" => Ok(vec![Content::text("fast done")]),
                _ => Err(AgentError::ToolNotFound(tool_call.name)),
            }
        }
    }

    #[tokio::test]
    async fn test_results_appended_in_issuance_order() -> Result<()> {
        let provider = MockProvider::new(vec![
            Message::assistant()
                .with_tool_request("call_a", Ok(ToolCall::new("slow", json!({}))))
                .with_tool_request("call_b", Ok(ToolCall::new("fast", json!({})))),
            Message::assistant().with_text("Both done."),
        ]);
        let mut agent = Agent::new(Box::new(provider));
        agent.register_toolkit(Arc::new(StaggeredToolkit::new()))?;

        let messages = collect(&agent, vec![Message::user().with_text("go")]).await?;

        assert_eq!(messages.len(), 4);
        let first = messages[1].content[0].as_tool_response().unwrap();
        let second = messages[2].content[0].as_tool_response().unwrap();
        assert_eq!(first.id, "call_a");
        assert_eq!(
            first.tool_result.as_ref().unwrap()[0].as_text().unwrap(),
            "slow done"
        );
        assert_eq!(second.id, "call_b");
        Ok(())
    }

    #[tokio::test]
    async fn test_turn_limit_aborts_runaway_loop() -> Result<()> {
        // Every turn requests another tool call; the cap has to stop it.
        let request =
            || Message::assistant().with_tool_request(
                "call_1",
                Ok(ToolCall::new("count_words", json!({"text": "x"}))),
            );
        let provider = MockProvider::new(vec![request(), request(), request()]);
        let mut agent = Agent::new(Box::new(provider));
        agent.register_toolkit(Arc::new(DemoToolkit::new()))?;
        let agent = agent.with_max_turns(2);

        let mut stream = agent.reply(&[Message::user().with_text("loop")]).await?;
        let mut yielded = 0;
        let mut error = None;
        loop {
            match stream.try_next().await {
                Ok(Some(_)) => yielded += 1,
                Ok(None) => break,
                Err(e) => {
                    error = Some(e);
                    break;
                }
            }
        }

        // two full turns (assistant + tool result each), then the abort
        assert_eq!(yielded, 4);
        let error = error.expect("expected the turn limit to trip");
        assert!(error.to_string().contains("Turn limit"));
        Ok(())
    }

    #[tokio::test]
    async fn test_event_tap_mirrors_stream() -> Result<()> {
        let provider = MockProvider::new(vec![Message::assistant().with_text("streamed")]);
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let agent = Agent::new(Box::new(provider)).with_event_tap(tx);

        let _ = collect(&agent, vec![Message::user().with_text("hi")]).await?;

        let mut taps = Vec::new();
        while let Ok(event) = rx.try_recv() {
            taps.push(event);
        }
        assert!(taps
            .iter()
            .any(|e| matches!(e, StreamEvent::TextDelta { text } if text == "streamed")));
        assert!(taps
            .iter()
            .any(|e| matches!(e, StreamEvent::MessageEnd { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn test_malformed_arguments_reflected_back() -> Result<()> {
        use crate::stream::StopReason;

        // The stream closes the turn while call_1's arguments are still a
        // truncated fragment; the loop must carry that failure back to the
        // model instead of aborting.
        let provider = MockProvider::from_events(vec![
            vec![
                StreamEvent::ToolCallStart {
                    id: "call_1".into(),
                    name: "count_words".into(),
                },
                StreamEvent::ToolCallDelta {
                    id: "call_1".into(),
                    arguments_delta: "{\"text\": ".into(),
                },
                StreamEvent::MessageEnd {
                    stop_reason: StopReason::ToolUse,
                },
            ],
            vec![
                StreamEvent::TextDelta {
                    text: "Let me try again without tools.".into(),
                },
                StreamEvent::MessageEnd {
                    stop_reason: StopReason::EndTurn,
                },
            ],
        ]);
        let mut agent = Agent::new(Box::new(provider));
        agent.register_toolkit(Arc::new(DemoToolkit::new()))?;

        let messages = collect(&agent, vec![Message::user().with_text("hi")]).await?;
        assert_eq!(messages.len(), 3);
        let response = messages[1].content[0].as_tool_response().unwrap();
        assert!(matches!(
            response.tool_result,
            Err(AgentError::InvalidParameters(_))
        ));
        assert_eq!(messages[2].text(), "Let me try again without tools.");
        Ok(())
    }
}
