use agent::{LineSource, LoopError, Observer};
use colored::Colorize;
use inquire::InquireError;
use serde_json::Value;
use std::io::{self, BufRead, IsTerminal};

use crate::table::render_todos;

const PROMPT: &str = "You: ";

/// Reads user lines and prints every step of a request.
///
/// Uses an interactive prompt when stdin is a terminal and plain line reads
/// when input is piped.
#[derive(Debug)]
pub struct Terminal {
    interactive: bool,
}

impl Default for Terminal {
    fn default() -> Self {
        Self::new()
    }
}

impl Terminal {
    pub fn new() -> Self {
        Self {
            interactive: io::stdin().is_terminal(),
        }
    }

    pub fn intro(&self, title: &str) {
        if self.interactive {
            let _ = cliclack::intro(title.bold());
        }
    }

    pub fn outro(&self, message: &str) {
        if self.interactive {
            let _ = cliclack::outro(message);
        }
    }

    pub fn reply(&self, text: &str) {
        println!("{} {}", "AI:".blue().bold(), text.blue());
    }

    pub fn error(&self, message: impl std::fmt::Display) {
        eprintln!("{}", message.to_string().red());
    }
}

impl LineSource for Terminal {
    fn read_line(&mut self) -> io::Result<Option<String>> {
        if !self.interactive {
            let mut line = String::new();
            return match io::stdin().lock().read_line(&mut line)? {
                0 => Ok(None),
                _ => Ok(Some(line)),
            };
        }

        match inquire::Text::new(PROMPT).prompt() {
            Ok(line) => Ok(Some(line)),
            Err(InquireError::OperationCanceled | InquireError::OperationInterrupted) => Ok(None),
            Err(InquireError::IO(err)) => Err(err),
            Err(err) => Err(io::Error::other(err)),
        }
    }
}

impl Observer for Terminal {
    fn on_plan(&mut self, plan: &str) {
        println!("{} {}", "AI Plan:".yellow(), plan);
    }

    fn on_action(&mut self, function: &str, input: &Value) {
        println!("{} {function} {input}", "Executing:".cyan());
    }

    fn on_observation(&mut self, _function: &str, observation: &Value) {
        match render_todos(observation) {
            Some(table) => println!("{table}"),
            None => println!("{} {observation}", "Observation:".dimmed()),
        }
    }

    fn on_output(&mut self, output: &str) {
        self.reply(output);
    }

    fn on_failure(&mut self, error: &LoopError) {
        self.error(format!("Request failed: {error}"));
    }
}
