//! Interactive console loop.

use std::sync::Arc;

use policy_rag::{Answer, ChatSession, PolicyAssistant, Role};
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use tracing::debug;

const HELP: &str = "Commands: /history  /sources  /help  /quit";

/// Read questions from the terminal until `/quit`, Ctrl-C or Ctrl-D.
pub async fn run_console(
    assistant: Arc<PolicyAssistant>,
    institution: &str,
    mut show_sources: bool,
) -> anyhow::Result<()> {
    let mut rl = DefaultEditor::new()?;
    let mut session = ChatSession::new(assistant);
    debug!(session = %session.id(), "console session started");

    println!("{institution} policy assistant. Ask a question about the policies.");
    println!("{HELP}\n");

    loop {
        let line = match rl.readline("You > ") {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(e) => return Err(e.into()),
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        let _ = rl.add_history_entry(input);

        match input {
            "/quit" | "/exit" => break,
            "/help" => {
                println!("{HELP}\n");
                continue;
            }
            "/sources" => {
                show_sources = !show_sources;
                println!("Sources {}.\n", if show_sources { "shown" } else { "hidden" });
                continue;
            }
            "/history" => {
                print_history(&session);
                continue;
            }
            _ => {}
        }

        match session.send(input).await {
            Ok(answer) => println!("\nAssistant > {}\n", format_answer(&answer, show_sources)),
            Err(e) => eprintln!("\n{}\n", e.user_message()),
        }
    }

    println!("Goodbye.");
    Ok(())
}

fn print_history(session: &ChatSession) {
    if session.history().is_empty() {
        println!("(no messages yet)\n");
        return;
    }
    for message in session.history() {
        let who = match message.role {
            Role::User => "You",
            Role::Assistant => "Assistant",
        };
        println!("[{}] {who}: {}", message.sent_at.format("%H:%M:%S"), message.content);
    }
    println!();
}

/// Answer text, optionally followed by the excerpts it was grounded in.
pub fn format_answer(answer: &Answer, show_sources: bool) -> String {
    if !show_sources || answer.sources.is_empty() {
        return answer.text.clone();
    }
    let sources: Vec<String> = answer.sources.iter().map(ToString::to_string).collect();
    format!("{}\n\nSources: {}", answer.text, sources.join("; "))
}
