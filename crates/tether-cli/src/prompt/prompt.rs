use anyhow::Result;
use tether::models::message::Message;

pub trait Prompt {
    /// Render a complete message (tool traffic, notices).
    fn render(&mut self, message: Box<Message>);
    /// Render one streamed display chunk, unbuffered.
    fn render_chunk(&mut self, chunk: &str);
    fn get_input(&mut self) -> Result<Input>;
    fn show_busy(&mut self);
    fn hide_busy(&mut self);
    fn close(&self);
}

pub struct Input {
    pub input_type: InputType,
    // Only present for Message inputs; commands carry no content.
    pub content: Option<String>,
}

pub enum InputType {
    AskAgain, // Ask the user for input again. Control flow command.
    Message,  // User sent a message
    Exit,     // User wants to exit the session
}

pub enum Theme {
    Light,
    Dark,
}
