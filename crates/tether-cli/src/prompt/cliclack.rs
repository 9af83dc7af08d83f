use std::io::{self, Write};

use anyhow::Result;
use bat::WrappingMode;
use cliclack::{input, spinner};
use console::style;

use tether::models::message::{Message, MessageContent};

use super::prompt::{Input, InputType, Prompt, Theme};

pub struct CliclackPrompt {
    spinner: Option<cliclack::ProgressBar>,
    theme: Theme,
}

impl CliclackPrompt {
    pub fn new() -> Self {
        CliclackPrompt {
            spinner: None,
            theme: Theme::Dark,
        }
    }

    fn theme_name(&self) -> &'static str {
        match self.theme {
            Theme::Light => "GitHub",
            Theme::Dark => "zenburn",
        }
    }
}

impl Default for CliclackPrompt {
    fn default() -> Self {
        Self::new()
    }
}

fn print_tool_request(content: &str, theme: &str, tool_name: &str) {
    bat::PrettyPrinter::new()
        .input(
            bat::Input::from_bytes(content.as_bytes()).name(format!("Tool Request: {}", tool_name)),
        )
        .theme(theme)
        .language("JSON")
        .grid(true)
        .header(true)
        .wrapping_mode(WrappingMode::Character)
        .print()
        .unwrap();
}

fn print_tool_response(content: &str, theme: &str, language: &str) {
    bat::PrettyPrinter::new()
        .input(bat::Input::from_bytes(content.as_bytes()).name("Tool Response:"))
        .theme(theme)
        .language(language)
        .grid(true)
        .header(true)
        .wrapping_mode(WrappingMode::Character)
        .print()
        .unwrap();
}

fn print(content: &str, theme: &str) {
    bat::PrettyPrinter::new()
        .input(bat::Input::from_bytes(content.as_bytes()))
        .theme(theme)
        .language("Markdown")
        .wrapping_mode(WrappingMode::Character)
        .print()
        .unwrap();
}

impl Prompt for CliclackPrompt {
    fn render(&mut self, message: Box<Message>) {
        let theme = self.theme_name();

        for message_content in &message.content {
            match message_content {
                MessageContent::Text(text) => print(&text.text, theme),
                MessageContent::ToolRequest(tool_request) => match &tool_request.tool_call {
                    Ok(call) => print_tool_request(
                        &serde_json::to_string_pretty(&call.arguments).unwrap(),
                        theme,
                        &call.name,
                    ),
                    Err(e) => print(&e.to_string(), theme),
                },
                MessageContent::ToolResponse(tool_response) => match &tool_response.tool_result {
                    Ok(output) => {
                        let joined = output
                            .iter()
                            .filter_map(|content| content.as_text())
                            .collect::<Vec<_>>()
                            .join("\n");
                        let language = if joined.starts_with('{') {
                            "JSON"
                        } else {
                            "Markdown"
                        };
                        print_tool_response(&joined, theme, language);
                    }
                    Err(e) => print(&e.to_string(), theme),
                },
                MessageContent::Image(image) => {
                    println!("Image: [type: {}]", image.mime_type);
                }
            }
        }

        println!();
        io::stdout().flush().expect("Failed to flush stdout");
    }

    fn render_chunk(&mut self, chunk: &str) {
        print!("{}", chunk);
        io::stdout().flush().expect("Failed to flush stdout");
    }

    fn get_input(&mut self) -> Result<Input> {
        let raw: String = input("Message: (exit to quit)").placeholder("").interact()?;
        let message_text = raw.trim().to_string();

        if message_text.is_empty() {
            return Ok(Input {
                input_type: InputType::AskAgain,
                content: None,
            });
        }

        if ["exit", "quit", "/exit", "/quit"]
            .iter()
            .any(|sentinel| message_text.eq_ignore_ascii_case(sentinel))
        {
            Ok(Input {
                input_type: InputType::Exit,
                content: None,
            })
        } else if message_text.eq_ignore_ascii_case("/t") {
            self.theme = match self.theme {
                Theme::Light => {
                    println!("Switching to Dark theme");
                    Theme::Dark
                }
                Theme::Dark => {
                    println!("Switching to Light theme");
                    Theme::Light
                }
            };
            self.get_input()
        } else if message_text.eq_ignore_ascii_case("/?") {
            println!("Commands:");
            println!("exit | quit - End the session");
            println!("/t - Toggle Light/Dark theme");
            println!("/? - Display this help message");
            println!("Ctrl+C - Interrupt the current reply");
            self.get_input()
        } else {
            Ok(Input {
                input_type: InputType::Message,
                content: Some(message_text),
            })
        }
    }

    fn show_busy(&mut self) {
        let spin = spinner();
        spin.start("awaiting reply");
        self.spinner = Some(spin);
    }

    fn hide_busy(&mut self) {
        if let Some(spin) = self.spinner.take() {
            spin.stop("");
        }
    }

    fn close(&self) {
        println!("{}", style("Session ended.").dim());
    }
}
