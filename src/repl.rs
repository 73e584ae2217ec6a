// ABOUTME: Line-mode terminal host — reads stdin lines, renders agent events, asks for approvals.
// ABOUTME: Ctrl-C cancels the running turn; at an idle prompt it exits.

use std::io::Write;
use std::sync::Arc;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal::unix::{Signal, SignalKind, signal};
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::LinesStream;
use tokio_util::sync::CancellationToken;

use crate::agent::{AgentEvent, UserEvent};
use crate::commands::{self, Command};
use crate::permissions::{ALLOW_ALL, ApprovalDecision, ApprovalPrompt, PermissionChecker};
use crate::provider::ProviderRegistry;
use crate::tools::ToolResult;

const PROMPT: &str = "> ";
const OUTPUT_PREVIEW_LINES: usize = 8;
const OUTPUT_PREVIEW_CHARS: usize = 600;

/// SIGINT as a stream; signals arriving between polls are queued, not lost.
fn interrupts() -> anyhow::Result<Signal> {
    signal(SignalKind::interrupt()).context("failed to install the Ctrl-C handler")
}

/// What the REPL should do after handling one input line.
#[derive(Debug)]
enum Flow {
    Idle,
    /// Waiting for the agent task; the token cancels a running turn.
    Busy(Option<CancellationToken>),
    Exit,
}

pub struct Repl {
    pub user_tx: mpsc::Sender<UserEvent>,
    pub agent_rx: mpsc::Receiver<AgentEvent>,
    pub prompt_rx: mpsc::Receiver<ApprovalPrompt>,
    pub checker: Arc<PermissionChecker>,
    pub providers: Arc<ProviderRegistry>,
    pub model: String,
    pub tool_count: usize,
}

impl Repl {
    pub async fn run(mut self) -> anyhow::Result<()> {
        let mut lines = LinesStream::new(BufReader::new(tokio::io::stdin()).lines());
        let mut interrupts = interrupts()?;
        let mut busy = false;
        let mut cancel: Option<CancellationToken> = None;
        let mut pending: Option<ApprovalPrompt> = None;

        println!(
            "localclaw · model {} · {} tools · /help for commands",
            self.model, self.tool_count
        );
        show_prompt();

        loop {
            tokio::select! {
                line = lines.next() => {
                    let Some(line) = line else { break };
                    let line = line?;

                    if let Some(prompt) = pending.take() {
                        match parse_approval(&line) {
                            Some(decision) => {
                                let _ = prompt.responder.send(decision);
                            }
                            None => {
                                print_inline("  answer y (once), s (session), a (all), or n (deny): ");
                                pending = Some(prompt);
                            }
                        }
                        continue;
                    }

                    if busy {
                        println!("(still working; press Ctrl-C to cancel)");
                        continue;
                    }

                    match self.handle_line(&line).await {
                        Flow::Idle => show_prompt(),
                        Flow::Busy(token) => {
                            busy = true;
                            cancel = token;
                        }
                        Flow::Exit => break,
                    }
                }
                event = self.agent_rx.recv() => {
                    let Some(event) = event else {
                        anyhow::bail!("agent task stopped unexpectedly");
                    };
                    if matches!(event, AgentEvent::Ready) {
                        busy = false;
                        cancel = None;
                        show_prompt();
                    } else {
                        render_event(&event);
                    }
                }
                Some(prompt) = self.prompt_rx.recv() => {
                    print_inline(&format!(
                        "\n? Allow {} [{}]  (y)es / (s)ession / (a)ll / (n)o: ",
                        prompt.request.describe(),
                        prompt.request.permission_level
                    ));
                    pending = Some(prompt);
                }
                _ = interrupts.recv() => {
                    // Dropping a pending prompt denies it.
                    pending = None;
                    match &cancel {
                        Some(token) => {
                            token.cancel();
                            println!("\n^C cancelling…");
                        }
                        None if busy => println!("\n^C (waiting for the current command)"),
                        None => {
                            println!();
                            break;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    async fn handle_line(&mut self, line: &str) -> Flow {
        let text = line.trim();
        if text.is_empty() {
            return Flow::Idle;
        }

        let Some(command) = commands::parse_command(text) else {
            let token = CancellationToken::new();
            return self
                .send(UserEvent::Message {
                    text: text.to_string(),
                    cancel: token.clone(),
                })
                .await
                .map_or(Flow::Exit, |()| Flow::Busy(Some(token)));
        };

        match command {
            Command::Help => println!("{}", commands::help_text()),
            Command::Models => println!("{}", self.models_listing()),
            Command::Trust => {
                self.checker.allow_all();
                println!("All tools allowed for this session.");
            }
            Command::Allow(tool) => {
                self.checker.allow_for_session(&tool);
                println!("Allowed for this session: {tool}");
            }
            Command::Revoke(tool) if tool == ALLOW_ALL => {
                self.checker.revoke_all();
                println!("All session allowances revoked.");
            }
            Command::Revoke(tool) => {
                if self.checker.revoke_for_session(&tool) {
                    println!("Revoked: {tool}");
                } else {
                    println!("{tool} was not allowed for this session.");
                }
            }
            Command::MissingArgument { usage } => println!("Usage: {usage}"),
            Command::Unknown(name) => {
                println!("Unknown command: /{name}. Type /help for available commands.")
            }
            Command::Exit => return Flow::Exit,
            Command::Model(Some(model)) => return self.forward(UserEvent::SetModel(model)).await,
            Command::Model(None) | Command::Status => return self.forward(UserEvent::Status).await,
            Command::Clear => return self.forward(UserEvent::Clear).await,
            Command::Compact => return self.forward(UserEvent::Compact).await,
            Command::Plan => return self.forward(UserEvent::TogglePlan).await,
        }
        Flow::Idle
    }

    async fn forward(&self, event: UserEvent) -> Flow {
        self.send(event).await.map_or(Flow::Exit, |()| Flow::Busy(None))
    }

    async fn send(&self, event: UserEvent) -> Result<(), ()> {
        self.user_tx.send(event).await.map_err(|_| {
            tracing::error!("agent task is gone");
        })
    }

    fn models_listing(&self) -> String {
        let available = self.providers.list();
        let mut lines = Vec::new();
        for (kind, models) in self.providers.catalog() {
            let suffix = if available.contains(&kind) {
                ""
            } else {
                " (not configured)"
            };
            lines.push(format!("{kind}{suffix}:"));
            for (id, label) in models {
                lines.push(format!("  {id:<28} {label}"));
            }
        }
        lines.join("\n")
    }
}

/// Map an answer to an approval prompt. Accepts letters, words, or 1-4.
fn parse_approval(answer: &str) -> Option<ApprovalDecision> {
    match answer.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" | "1" => Some(ApprovalDecision::AllowOnce),
        "s" | "session" | "2" => Some(ApprovalDecision::AllowForSession),
        "a" | "all" | "3" => Some(ApprovalDecision::AllowAll),
        "n" | "no" | "4" => Some(ApprovalDecision::Deny),
        _ => None,
    }
}

fn render_event(event: &AgentEvent) {
    match event {
        AgentEvent::TextDelta(text) => print_inline(text),
        AgentEvent::ToolCallStart { name, .. } => println!("\n⚙ {name}"),
        AgentEvent::ToolCallInput { input, .. } => println!("  {}", preview(&input.to_string())),
        AgentEvent::ToolCallComplete { name, result, .. } => {
            println!("{}", render_result(name, result))
        }
        AgentEvent::TurnComplete => println!(),
        AgentEvent::Error(message) => eprintln!("\nerror: {message}"),
        AgentEvent::Notice(message) => println!("{message}"),
        AgentEvent::Ready => {}
    }
}

fn render_result(name: &str, result: &ToolResult) -> String {
    let (mark, body) = if result.success {
        ("✓", result.output.as_str())
    } else {
        ("✗", result.error.as_deref().unwrap_or("failed"))
    };
    let body = preview(body);
    if body.is_empty() {
        format!("  {mark} {name}")
    } else {
        let indented: Vec<String> = body.lines().map(|l| format!("    {l}")).collect();
        format!("  {mark} {name}\n{}", indented.join("\n"))
    }
}

/// Shorten tool output for display.
fn preview(text: &str) -> String {
    let mut out: String = text
        .lines()
        .take(OUTPUT_PREVIEW_LINES)
        .collect::<Vec<_>>()
        .join("\n");
    let mut truncated = text.lines().count() > OUTPUT_PREVIEW_LINES;
    if out.chars().count() > OUTPUT_PREVIEW_CHARS {
        out = out.chars().take(OUTPUT_PREVIEW_CHARS).collect();
        truncated = true;
    }
    if truncated {
        out.push_str(" …");
    }
    out
}

fn show_prompt() {
    print_inline(PROMPT);
}

fn print_inline(text: &str) {
    let mut stdout = std::io::stdout().lock();
    let _ = stdout.write_all(text.as_bytes());
    let _ = stdout.flush();
}
