//! `companion chat`: interactive or single-message chat mode.
//!
//! Root turns run on their own task so the input loop stays free to answer
//! `ask_user` questions and to talk to a running interview while the turn
//! is blocked on them.

use companion_agent::Orchestrator;
use companion_core::{ChatMessage, Result as AgentResult};
use std::io::Write;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

/// Longest tool output echoed to the terminal.
const TOOL_PREVIEW_CHARS: usize = 120;

/// What a line of input means right now.
#[derive(Debug, PartialEq, Eq)]
enum Input<'a> {
    Quit,
    Cancel,
    DrainEvents,
    PushEvent(&'a str),
    ShowPlan,
    Empty,
    Text(&'a str),
}

fn parse_input(line: &str) -> Input<'_> {
    let line = line.trim();
    match line {
        "" => Input::Empty,
        "exit" | "quit" | "/exit" | "/quit" => Input::Quit,
        "/cancel" => Input::Cancel,
        "/events" => Input::DrainEvents,
        "/plan" => Input::ShowPlan,
        _ => match line.strip_prefix("/event ") {
            Some(event) if !event.trim().is_empty() => Input::PushEvent(event.trim()),
            _ => Input::Text(line),
        },
    }
}

pub async fn run(message: Option<String>) -> Result<(), Box<dyn std::error::Error>> {
    let (config, orchestrator) = super::bootstrap().await?;

    let (done_tx, mut done_rx) = mpsc::unbounded_channel::<AgentResult<Option<ChatMessage>>>();
    let mut prompt_state = orchestrator.prompt().subscribe();
    let mut interview_state = orchestrator.interview().channel().subscribe();
    let mut interview_replies = orchestrator.interview().subscribe_replies();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    let single = message.is_some();
    let mut busy = false;

    if let Some(message) = message {
        spawn_turn(&orchestrator, &done_tx, ChatMessage::user(message));
        busy = true;
    } else {
        println!();
        println!("  Companion — interactive mode");
        println!();
        println!("  Model:       {}", config.model);
        println!("  Sub-agents:  {}", orchestrator.sub_agent_names().len());
        println!();
        println!("  /cancel        close an open question or interview");
        println!("  /event <text>  queue a background event");
        println!("  /events        send queued events to the companion");
        println!("  /plan          show the session plan");
        println!("  exit           quit");
        println!();
        you_prompt()?;
    }

    loop {
        tokio::select! {
            Some(result) = done_rx.recv() => {
                busy = false;
                match result {
                    Ok(Some(reply)) => print_reply(&reply),
                    Ok(None) => println!("  (no queued events)"),
                    Err(e) => eprintln!("  [Error] {e}"),
                }
                println!();
                if single {
                    break;
                }
                you_prompt()?;
            }

            Ok(()) = prompt_state.changed() => {
                let state = prompt_state.borrow_and_update().clone();
                if let Some(question) = state.message.filter(|_| state.is_open) {
                    println!();
                    println!("  Companion asks > {question}");
                    print!("  Answer > ");
                    std::io::stdout().flush()?;
                }
            }

            Ok(()) = interview_state.changed() => {
                let open = interview_state.borrow_and_update().is_open;
                println!();
                println!("  {}", if open { "[interview started]" } else { "[interview finished]" });
            }

            Ok(()) = interview_replies.changed() => {
                let reply = interview_replies.borrow_and_update().clone();
                if let Some(text) = reply {
                    for line in text.lines() {
                        println!("  Interviewer > {line}");
                    }
                    print!("  You > ");
                    std::io::stdout().flush()?;
                }
            }

            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };

                match parse_input(&line) {
                    Input::Quit => break,
                    Input::Empty => {}
                    Input::Cancel => {
                        let cancelled =
                            orchestrator.prompt().cancel() || orchestrator.interview().cancel();
                        if !cancelled {
                            println!("  Nothing to cancel.");
                        }
                    }
                    Input::PushEvent(event) => {
                        orchestrator.push_event(event);
                        println!("  Queued ({} pending).", orchestrator.pending_events().len());
                    }
                    Input::ShowPlan => {
                        println!("{}", orchestrator.current_plan().unwrap_or_default());
                    }
                    Input::DrainEvents if busy => println!("  Still thinking, try again shortly."),
                    Input::DrainEvents => {
                        spawn_drain(&orchestrator, &done_tx);
                        busy = true;
                    }
                    Input::Text(text) => {
                        if orchestrator.prompt().is_open() {
                            orchestrator.prompt().submit(text);
                        } else if orchestrator.interview().channel().is_open() {
                            spawn_interview_reply(&orchestrator, text.to_string());
                        } else if busy {
                            println!("  Still thinking, try again shortly.");
                        } else {
                            spawn_turn(&orchestrator, &done_tx, ChatMessage::user(text));
                            busy = true;
                        }
                    }
                }
            }
        }
    }

    orchestrator.shutdown().await;
    if !single {
        println!();
        println!("  Goodbye!");
        println!();
    }
    Ok(())
}

type Done = mpsc::UnboundedSender<AgentResult<Option<ChatMessage>>>;

fn spawn_turn(orchestrator: &Arc<Orchestrator>, done: &Done, message: ChatMessage) {
    let orchestrator = orchestrator.clone();
    let done = done.clone();
    tokio::spawn(async move {
        let result = orchestrator.act(message).await.map(Some);
        let _ = done.send(result);
    });
}

fn spawn_drain(orchestrator: &Arc<Orchestrator>, done: &Done) {
    let orchestrator = orchestrator.clone();
    let done = done.clone();
    tokio::spawn(async move {
        let _ = done.send(orchestrator.act_events().await);
    });
}

/// Replies arrive through the interview's reply watch; only errors are
/// reported here.
fn spawn_interview_reply(orchestrator: &Arc<Orchestrator>, text: String) {
    let interview = orchestrator.interview().clone();
    tokio::spawn(async move {
        if let Err(e) = interview.respond(&text).await {
            eprintln!("  [Interview error] {e}");
        }
    });
}

fn print_reply(reply: &ChatMessage) {
    for call in reply.tool_parts() {
        let output = call.tool_output.as_deref().unwrap_or("(pending)");
        println!("  [{}] {}", call.tool, preview(output));
    }
    for line in reply.text().lines() {
        println!("  Companion > {line}");
    }
}

fn preview(text: &str) -> String {
    let flat = text.replace('\n', " ");
    if flat.chars().count() <= TOOL_PREVIEW_CHARS {
        flat
    } else {
        let cut: String = flat.chars().take(TOOL_PREVIEW_CHARS).collect();
        format!("{cut}…")
    }
}

fn you_prompt() -> std::io::Result<()> {
    print!("  You > ");
    std::io::stdout().flush()
}
