//! Interactive chat loop.

use std::io::{self, Write};

use portal_chat::format::{format_relative_time, truncate};
use portal_chat::{ChatSession, ChatTarget, EventSource, SendError, TurnContent, TurnOutcome};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info};

use crate::render::TerminalObserver;

/// Width of a message preview in `/history`.
const HISTORY_PREVIEW: usize = 72;

/// A line typed at the prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Leave the REPL.
    Quit,
    /// Start a new thread on the same surface.
    New,
    /// Print the current thread id.
    Thread,
    /// Print the transcript.
    History,
    /// Switch to a course chat.
    Course(String),
    /// Switch to the general assistant.
    Assistant,
    /// Show the command list.
    Help,
    /// Send a chat message.
    Message(String),
    /// A slash command we do not know.
    Unknown(String),
    /// Blank input.
    Empty,
}

impl Command {
    /// Parse a prompt line.
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        if line.is_empty() {
            return Self::Empty;
        }
        let Some(rest) = line.strip_prefix('/') else {
            return Self::Message(line.to_string());
        };

        let mut parts = rest.splitn(2, char::is_whitespace);
        let name = parts.next().unwrap_or_default();
        let arg = parts.next().map(str::trim).unwrap_or_default();
        match name {
            "quit" | "exit" | "q" => Self::Quit,
            "new" => Self::New,
            "thread" => Self::Thread,
            "history" => Self::History,
            "assistant" => Self::Assistant,
            "help" | "?" => Self::Help,
            "course" if !arg.is_empty() => Self::Course(arg.to_string()),
            _ => Self::Unknown(line.to_string()),
        }
    }
}

const HELP: &str = "\
Commands:
  /new             start a new conversation
  /thread          show the thread id
  /history         show this conversation
  /course <id>     chat about a course
  /assistant       chat with the general assistant
  /quit            exit
Ctrl-C cancels a streaming answer; at the prompt it exits.";

/// The REPL around one chat session.
pub struct App<S> {
    session: ChatSession<S>,
}

impl<S: EventSource> App<S> {
    /// Wrap a session.
    pub const fn new(session: ChatSession<S>) -> Self {
        Self { session }
    }

    /// Send one message and print the answer.
    ///
    /// Ctrl-C while streaming cancels the turn.
    pub async fn ask(&mut self, text: &str) -> Result<TurnOutcome, SendError> {
        let handle = self.session.cancel_handle();
        let watcher = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                debug!("Ctrl-C while streaming");
                handle.cancel();
            }
        });

        let mut observer = TerminalObserver::new(io::stdout());
        let result = self.session.send_with(text, &mut observer).await;
        watcher.abort();
        result
    }

    /// Read prompts from stdin until EOF, `/quit` or Ctrl-C.
    pub async fn run(&mut self) -> anyhow::Result<()> {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        println!(
            "Connected to {} (thread {}). Type /help for commands.",
            self.session.endpoint(),
            self.session.thread_id()
        );

        loop {
            self.prompt()?;
            let line = tokio::select! {
                line = lines.next_line() => line?,
                _ = tokio::signal::ctrl_c() => None,
            };
            let Some(line) = line else {
                println!();
                break;
            };

            match Command::parse(&line) {
                Command::Quit => break,
                Command::Empty => {}
                Command::New => {
                    self.session.reset_thread();
                    println!("New conversation (thread {}).", self.session.thread_id());
                }
                Command::Thread => println!("{}", self.session.thread_id()),
                Command::History => self.print_history(),
                Command::Course(course_id) => {
                    self.session.switch_context(ChatTarget::course(course_id));
                    println!("Course chat at {}.", self.session.endpoint());
                }
                Command::Assistant => {
                    self.session.switch_context(ChatTarget::assistant());
                    println!("Assistant chat at {}.", self.session.endpoint());
                }
                Command::Help => println!("{HELP}"),
                Command::Unknown(input) => println!("Unknown command: {input}"),
                Command::Message(text) => {
                    // Failures are already printed by the observer.
                    if let Ok(outcome) = self.ask(&text).await {
                        info!(turn_id = %outcome.turn_id, end = ?outcome.end, "Turn finished");
                    }
                }
            }
        }
        Ok(())
    }

    fn prompt(&self) -> io::Result<()> {
        let mut out = io::stdout();
        write!(out, "{}> ", self.session.context().target.label())?;
        out.flush()
    }

    fn print_history(&self) {
        let transcript = self.session.transcript();
        if transcript.is_empty() {
            println!("(empty)");
            return;
        }
        let now = chrono::Utc::now();
        for turn in transcript.turns() {
            let (who, text) = match turn.content() {
                TurnContent::User { text } => ("you", text.as_str()),
                TurnContent::Assistant(content) => ("bot", content.streamed_text()),
            };
            let text = text.replace('\n', " ");
            println!(
                "[{:>9}] {who}: {}",
                format_relative_time(turn.created_at(), now),
                truncate(&text, HISTORY_PREVIEW)
            );
        }
    }
}
