//! Turns the provider event stream into an ordered sequence of display
//! chunks for a terminal or API caller.
//!
//! Forward-only and deterministic: the same event sequence always renders
//! byte-identical output, and a consumed chunk is never replayed. Dropping
//! the event channel simply stops forwarding; output already emitted stays.

use std::collections::HashSet;

use futures::StreamExt;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::stream::{StopReason, StreamEvent};

#[derive(Debug, Default)]
pub struct StreamRenderer {
    announced: HashSet<String>,
}

impl StreamRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Render one event to a display chunk, if it produces one.
    ///
    /// Text is forwarded verbatim and immediately. The first announcement of
    /// a call id with a concrete name emits a one-time marker; its argument
    /// fragments then stream through verbatim in arrival order. The turn
    /// completion marker after tool calls emits a separating blank line so
    /// interleaved tool/text segments stay distinguishable.
    pub fn render(&mut self, event: &StreamEvent) -> Option<String> {
        match event {
            StreamEvent::TextDelta { text } => Some(text.clone()),
            StreamEvent::ToolCallStart { id, name } => {
                if name.is_empty() || !self.announced.insert(id.clone()) {
                    return None;
                }
                Some(format!("\n\n< TOOL CALL: {} >\n\n", name))
            }
            StreamEvent::ToolCallDelta {
                arguments_delta, ..
            } => Some(arguments_delta.clone()),
            StreamEvent::ToolCallEnd { .. } => None,
            StreamEvent::MessageEnd { stop_reason } => match stop_reason {
                StopReason::ToolUse => Some("\n\n".to_string()),
                _ => None,
            },
            StreamEvent::Error { .. } => None,
        }
    }

    /// Render a whole recorded sequence at once.
    pub fn render_all<'a>(
        &mut self,
        events: impl IntoIterator<Item = &'a StreamEvent>,
    ) -> String {
        events
            .into_iter()
            .filter_map(|event| self.render(event))
            .collect()
    }
}

/// Pump events from a channel into `on_chunk` until the sending side closes.
pub async fn forward(rx: UnboundedReceiver<StreamEvent>, mut on_chunk: impl FnMut(String)) {
    let mut events = UnboundedReceiverStream::new(rx);
    let mut renderer = StreamRenderer::new();
    while let Some(event) = events.next().await {
        if let Some(chunk) = renderer.render(&event) {
            on_chunk(chunk);
        }
    }
}
