use std::path::PathBuf;

use anyhow::Result;
use futures::StreamExt;
use tokio::sync::mpsc::UnboundedReceiver;

use tether::agent::Agent;
use tether::models::message::Message;
use tether::models::role::Role;
use tether::render::StreamRenderer;
use tether::stream::StreamEvent;

use crate::prompt::prompt::{InputType, Prompt};
use crate::session::session_file::persist_messages;

/// The interactive driver: reads one line per turn, feeds it to the agent,
/// renders the streamed reply, and exits on a sentinel input.
pub struct Session {
    agent: Agent,
    prompt: Box<dyn Prompt>,
    session_file: PathBuf,
    events: Option<UnboundedReceiver<StreamEvent>>,
}

impl Session {
    pub fn new(
        agent: Agent,
        prompt: Box<dyn Prompt>,
        session_file: PathBuf,
        events: UnboundedReceiver<StreamEvent>,
    ) -> Self {
        Session {
            agent,
            prompt,
            session_file,
            events: Some(events),
        }
    }

    pub async fn start(&mut self) -> Result<()> {
        self.setup_session();

        let mut messages = Vec::new();

        loop {
            let input = self.prompt.get_input()?;
            match input.input_type {
                InputType::Message => {
                    if let Some(content) = &input.content {
                        messages.push(Message::user().with_text(content));
                        persist_messages(&self.session_file, &messages)?;
                    }
                }
                InputType::Exit => break,
                InputType::AskAgain => continue,
            }

            // Tool failures flow back into the conversation; an error here
            // is a lost transport or provider and ends the session.
            if let Err(e) = self.process_turn(&mut messages).await {
                self.prompt.render_chunk(&format!("\nFatal: {}\n", e));
                break;
            }
        }

        self.close_session();
        Ok(())
    }

    pub async fn headless_start(&mut self, initial_message: String) -> Result<()> {
        let mut messages = vec![Message::user().with_text(&initial_message)];
        persist_messages(&self.session_file, &messages)?;

        let outcome = self.process_turn(&mut messages).await;
        self.close_session();
        outcome
    }

    async fn process_turn(&mut self, messages: &mut Vec<Message>) -> Result<()> {
        let mut stream = self.agent.reply(messages).await?;

        let mut events = self.events.take();
        let mut renderer = StreamRenderer::new();
        let mut busy = true;
        let mut fatal = None;
        self.prompt.show_busy();

        loop {
            tokio::select! {
                response = stream.next() => {
                    match response {
                        Some(Ok(message)) => {
                            messages.push(message.clone());
                            persist_messages(&self.session_file, messages)
                                .unwrap_or_else(|e| tracing::warn!(error = %e, "failed to persist messages"));
                            // Assistant output already streamed through the
                            // renderer; show tool traffic in full.
                            if message.role == Role::Tool {
                                self.prompt.render(Box::new(message));
                            }
                        }
                        Some(Err(e)) => {
                            fatal = Some(e);
                            break;
                        }
                        None => break,
                    }
                }
                event = recv_event(&mut events) => {
                    match event {
                        Some(event) => {
                            if let Some(chunk) = renderer.render(&event) {
                                if busy {
                                    self.prompt.hide_busy();
                                    busy = false;
                                }
                                self.prompt.render_chunk(&chunk);
                            }
                        }
                        // Tap gone; stop polling it.
                        None => events = None,
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    drop(stream);
                    // Reset the interaction to before the interrupted user
                    // request; only fully-completed steps stay recorded.
                    while let Some(message) = messages.pop() {
                        if message.role == Role::User {
                            break;
                        }
                    }
                    persist_messages(&self.session_file, messages)
                        .unwrap_or_else(|e| tracing::warn!(error = %e, "failed to persist messages"));
                    self.prompt.render_chunk("\nInterrupted: dropping the last request.\n");
                    break;
                }
            }
        }

        if busy {
            self.prompt.hide_busy();
        }

        // Drain display chunks that arrived after the reply stream closed.
        if let Some(rx) = events.as_mut() {
            while let Ok(event) = rx.try_recv() {
                if let Some(chunk) = renderer.render(&event) {
                    self.prompt.render_chunk(&chunk);
                }
            }
        }
        self.prompt.render_chunk("\n");
        self.events = events;

        match fatal {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn setup_session(&mut self) {
        self.prompt.render(raw_message(&format!(
            "Starting session. Recording to {}\n",
            self.session_file.display()
        )));
        let tool_count = self.agent.registry().len();
        self.prompt
            .render(raw_message(&format!("Connected {} tool(s).\n", tool_count)));
    }

    fn close_session(&mut self) {
        self.prompt.render(raw_message(&format!(
            "Closing session. Recorded to {}\n",
            self.session_file.display()
        )));
        self.prompt.close();
    }
}

async fn recv_event(events: &mut Option<UnboundedReceiver<StreamEvent>>) -> Option<StreamEvent> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

fn raw_message(content: &str) -> Box<Message> {
    Box::new(Message::assistant().with_text(content))
}
