// ABOUTME: Integration tests for the streaming agent loop against a scripted provider.
// ABOUTME: Covers text turns, tool rounds, argument assembly, failures, plan mode, and cancellation.

mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use common::{RecordingExecutor, Script, ScriptedProvider, text, tool_call};
use localclaw::agent::planner::PLAN_MODE_PROMPT;
use localclaw::agent::{AgentConfig, AgentEvent, AgentLoop, LoopState, TurnOutcome};
use localclaw::provider::{ContentBlock, MessageContent, Role, StreamEvent, ToolDefinition};
use localclaw::tools::ToolResult;

fn config() -> AgentConfig {
    AgentConfig {
        model: "claude-sonnet-4-20250514".to_string(),
        max_tokens: 4096,
        temperature: 0.0,
        system_prompt: "You are a test assistant.".to_string(),
    }
}

fn agent(provider: &Arc<ScriptedProvider>, executor: &Arc<RecordingExecutor>) -> AgentLoop {
    AgentLoop::new(provider.clone(), executor.clone(), config())
}

fn script(parts: Vec<Vec<StreamEvent>>) -> Vec<StreamEvent> {
    let mut events: Vec<StreamEvent> = parts.into_iter().flatten().collect();
    events.push(StreamEvent::MessageEnd);
    events
}

async fn run(agent: &mut AgentLoop, input: &str, cancel: &CancellationToken) -> (TurnOutcome, Vec<AgentEvent>) {
    let (tx, mut rx) = mpsc::channel(256);
    let outcome = agent.run_turn(input, &tx, cancel).await;
    drop(tx);
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    (outcome, events)
}

fn tool_result_blocks(content: &MessageContent) -> Vec<(String, String, bool)> {
    match content {
        MessageContent::Blocks(blocks) => blocks
            .iter()
            .filter_map(|b| match b {
                ContentBlock::ToolResult {
                    tool_use_id,
                    content,
                    is_error,
                } => Some((tool_use_id.clone(), content.clone(), *is_error)),
                _ => None,
            })
            .collect(),
        MessageContent::Text(_) => Vec::new(),
    }
}

#[tokio::test]
async fn text_only_turn_streams_deltas_and_completes() {
    let provider = Arc::new(ScriptedProvider::new(vec![script(vec![vec![
        text("Hel"),
        text("lo!"),
    ]])]));
    let executor = Arc::new(RecordingExecutor::new());
    let mut agent = agent(&provider, &executor);

    let (outcome, events) = run(&mut agent, "hi", &CancellationToken::new()).await;

    assert_eq!(outcome, TurnOutcome::Completed { rounds: 1 });
    assert_eq!(
        events,
        vec![
            AgentEvent::TextDelta("Hel".into()),
            AgentEvent::TextDelta("lo!".into()),
            AgentEvent::TurnComplete,
        ]
    );
    assert_eq!(agent.messages().len(), 2);
    assert_eq!(agent.messages()[1].role, Role::Assistant);
    assert_eq!(agent.messages()[1].text(), "Hello!");
    assert_eq!(agent.state(), LoopState::Complete);
    assert!(executor.names().is_empty());
}

#[tokio::test]
async fn list_files_round_trip_emits_events_in_order() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        script(vec![
            vec![text("Let me look.")],
            tool_call("t1", "glob", r#"{"pattern":"*.rs"}"#),
        ]),
        script(vec![vec![text("Found 2 files.")]]),
    ]));
    let executor =
        Arc::new(RecordingExecutor::new().with_result("glob", ToolResult::ok("a.rs\nb.rs")));
    let mut agent = agent(&provider, &executor);

    let (outcome, events) = run(&mut agent, "list files", &CancellationToken::new()).await;

    assert_eq!(outcome, TurnOutcome::Completed { rounds: 2 });
    assert_eq!(
        events,
        vec![
            AgentEvent::TextDelta("Let me look.".into()),
            AgentEvent::ToolCallStart {
                id: "t1".into(),
                name: "glob".into()
            },
            AgentEvent::ToolCallInput {
                id: "t1".into(),
                name: "glob".into(),
                input: json!({"pattern": "*.rs"}),
            },
            AgentEvent::ToolCallComplete {
                id: "t1".into(),
                name: "glob".into(),
                result: ToolResult::ok("a.rs\nb.rs"),
            },
            AgentEvent::TextDelta("Found 2 files.".into()),
            AgentEvent::TurnComplete,
        ]
    );

    let history = agent.messages();
    assert_eq!(history.len(), 4);
    assert_eq!(history[1].text(), "Let me look.");
    assert_eq!(
        history[1].tool_uses(),
        vec![("t1", "glob", &json!({"pattern": "*.rs"}))]
    );
    assert_eq!(history[2].role, Role::User);
    assert_eq!(
        tool_result_blocks(&history[2].content),
        vec![("t1".to_string(), "a.rs\nb.rs".to_string(), false)]
    );
    assert_eq!(history[3].text(), "Found 2 files.");

    // The second request carries the tool result.
    assert_eq!(provider.stream_count(), 2);
    let (sent, _) = provider.last_stream_call();
    assert_eq!(sent.len(), 3);
}

#[tokio::test]
async fn several_calls_run_in_start_order_with_one_result_message() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        script(vec![
            tool_call("a", "read", r#"{"path":"x"}"#),
            tool_call("b", "grep", r#"{"q":"y"}"#),
            tool_call("c", "bash", r#"{"cmd":"ls"}"#),
        ]),
        script(vec![vec![text("done")]]),
    ]));
    let executor = Arc::new(
        RecordingExecutor::new().with_result("grep", ToolResult::failure("no matches")),
    );
    let mut agent = agent(&provider, &executor);

    let (outcome, _) = run(&mut agent, "go", &CancellationToken::new()).await;

    assert_eq!(outcome, TurnOutcome::Completed { rounds: 2 });
    assert_eq!(executor.names(), vec!["read", "grep", "bash"]);
    let results = tool_result_blocks(&agent.messages()[2].content);
    assert_eq!(
        results,
        vec![
            ("a".to_string(), "ran read".to_string(), false),
            ("b".to_string(), "no matches".to_string(), true),
            ("c".to_string(), "ran bash".to_string(), false),
        ]
    );
}

#[tokio::test]
async fn malformed_tool_input_becomes_empty_object() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        script(vec![tool_call("t1", "glob", r#"{"pattern": "*.r"#)]),
        script(vec![vec![text("ok")]]),
    ]));
    let executor = Arc::new(RecordingExecutor::new());
    let mut agent = agent(&provider, &executor);

    let (outcome, _) = run(&mut agent, "go", &CancellationToken::new()).await;

    assert!(matches!(outcome, TurnOutcome::Completed { .. }));
    let calls = executor.calls.lock().unwrap().clone();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].input, json!({}));
}

#[tokio::test]
async fn repeated_tool_start_is_reported_once() {
    let start = StreamEvent::ToolCallStart {
        id: "call_0".into(),
        name: "glob".into(),
    };
    let provider = Arc::new(ScriptedProvider::new(vec![
        script(vec![
            vec![start.clone(), start],
            tool_call("call_0", "glob", r#"{"pattern":"*.rs"}"#)[1..].to_vec(),
        ]),
        script(vec![vec![text("done")]]),
    ]));
    let executor = Arc::new(RecordingExecutor::new());
    let mut agent = agent(&provider, &executor);

    let (_, events) = run(&mut agent, "go", &CancellationToken::new()).await;

    let starts = events
        .iter()
        .filter(|e| matches!(e, AgentEvent::ToolCallStart { .. }))
        .count();
    assert_eq!(starts, 1);
    assert_eq!(executor.calls.lock().unwrap()[0].input, json!({"pattern": "*.rs"}));
}

#[tokio::test]
async fn empty_response_is_not_recorded() {
    let provider = Arc::new(ScriptedProvider::new(vec![vec![StreamEvent::MessageEnd]]));
    let executor = Arc::new(RecordingExecutor::new());
    let mut agent = agent(&provider, &executor);

    let (outcome, events) = run(&mut agent, "hi", &CancellationToken::new()).await;

    assert_eq!(outcome, TurnOutcome::Completed { rounds: 1 });
    assert_eq!(events, vec![AgentEvent::TurnComplete]);
    assert_eq!(agent.messages().len(), 1);
}

#[tokio::test]
async fn stream_error_keeps_committed_history_and_drops_partial_text() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        script(vec![tool_call("t1", "read", r#"{"path":"a"}"#)]),
        vec![text("partial"), StreamEvent::error("rate limited")],
    ]));
    let executor = Arc::new(RecordingExecutor::new());
    let mut agent = agent(&provider, &executor);

    let (outcome, events) = run(&mut agent, "read a", &CancellationToken::new()).await;

    assert_eq!(
        outcome,
        TurnOutcome::Failed {
            message: "rate limited".into()
        }
    );
    assert_eq!(events.last(), Some(&AgentEvent::Error("rate limited".into())));
    assert!(!events.contains(&AgentEvent::TurnComplete));
    let history = agent.messages();
    assert_eq!(history.len(), 3);
    assert!(history.iter().all(|m| !m.text().contains("partial")));
}

#[tokio::test]
async fn stream_without_terminal_event_fails_the_turn() {
    let provider = Arc::new(ScriptedProvider::new(vec![vec![text("cut off")]]));
    let executor = Arc::new(RecordingExecutor::new());
    let mut agent = agent(&provider, &executor);

    let (outcome, events) = run(&mut agent, "hi", &CancellationToken::new()).await;

    assert_eq!(
        outcome,
        TurnOutcome::Failed {
            message: "Provider stream ended unexpectedly".into()
        }
    );
    assert!(matches!(events.last(), Some(AgentEvent::Error(_))));
    assert_eq!(agent.messages().len(), 1);
}

#[tokio::test]
async fn request_options_carry_model_tools_and_plan_prompt() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        script(vec![vec![text("plain")]]),
        script(vec![vec![text("planned")]]),
    ]));
    let executor = Arc::new(RecordingExecutor::new());
    let tools = vec![ToolDefinition {
        name: "glob".into(),
        description: "find files".into(),
        input_schema: json!({"type": "object"}),
    }];
    let mut agent = agent(&provider, &executor).with_tools(tools.clone());

    run(&mut agent, "first", &CancellationToken::new()).await;
    let (_, options) = provider.last_stream_call();
    assert_eq!(options.model, "claude-sonnet-4-20250514");
    assert_eq!(options.max_tokens, 4096);
    assert_eq!(options.tools, tools);
    assert_eq!(
        options.system_prompt.as_deref(),
        Some("You are a test assistant.")
    );

    agent.set_plan_mode(true);
    run(&mut agent, "second", &CancellationToken::new()).await;
    let (sent, options) = provider.last_stream_call();
    let system = options.system_prompt.unwrap();
    assert!(system.starts_with("You are a test assistant."));
    assert!(system.ends_with(PLAN_MODE_PROMPT));
    // History carries across turns.
    assert_eq!(sent.len(), 3);
    assert_eq!(sent[0].text(), "first");
}

#[tokio::test]
async fn cancellation_between_tools_answers_every_call() {
    let cancel = CancellationToken::new();
    let provider = Arc::new(ScriptedProvider::new(vec![script(vec![
        tool_call("a", "read", r#"{}"#),
        tool_call("b", "write", r#"{}"#),
    ])]));
    let executor = Arc::new(RecordingExecutor::new().cancelling_on("read", cancel.clone()));
    let mut agent = agent(&provider, &executor);

    let (outcome, events) = run(&mut agent, "go", &cancel).await;

    assert_eq!(
        outcome,
        TurnOutcome::Failed {
            message: "Cancelled".into()
        }
    );
    assert_eq!(executor.names(), vec!["read"]);
    assert_eq!(
        tool_result_blocks(&agent.messages()[2].content),
        vec![
            ("a".to_string(), "ran read".to_string(), false),
            ("b".to_string(), "Cancelled".to_string(), true),
        ]
    );
    assert_eq!(events.last(), Some(&AgentEvent::Error("Cancelled".into())));
    // No further stream call after cancellation.
    assert_eq!(provider.stream_count(), 1);
}

#[tokio::test]
async fn cancellation_while_streaming_discards_the_partial_response() {
    let cancel = CancellationToken::new();
    let provider = Arc::new(ScriptedProvider::with_scripts(vec![Script::Hang(vec![text(
        "thinking",
    )])]));
    let executor = Arc::new(RecordingExecutor::new());
    let mut agent = agent(&provider, &executor);

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let (outcome, events) = run(&mut agent, "think", &cancel).await;

    assert_eq!(
        outcome,
        TurnOutcome::Failed {
            message: "Cancelled".into()
        }
    );
    assert_eq!(events.first(), Some(&AgentEvent::TextDelta("thinking".into())));
    assert_eq!(agent.messages().len(), 1);
}
