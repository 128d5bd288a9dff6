//! Line-oriented chat front end.
//!
//! Plain lines are sent as messages; lines starting with `/` are commands.

use std::path::PathBuf;

use chrono::Utc;

use wgpt_chat::display::{format_file_size, relative_date};
use wgpt_chat::{
    ChatOrchestrator, DictationOutcome, Notification, Notifier, Redirect, SelectedFile,
    SendOutcome, Session, Severity,
};
use wgpt_core::types::Role;

pub const HELP: &str = "\
Commands:
  /new                 start a new chat
  /list                list chats
  /search <text>       list chats whose title contains <text>
  /select <n>          switch to chat <n> from /list
  /delete [n]          delete chat <n>, or the current chat
  /rename <title>      rename the current chat
  /history             show the current chat
  /edit <n> <text>     replace message <n> and drop everything after it
  /resend              ask again for the last message
  /attach <path>       stage an image for the next message
  /detach <id>         unstage an image
  /dictate             start or stop voice input
  /logout              sign out and clear all chats
  /quit                exit
Anything else is sent as a message.";

/// A parsed input line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Send(String),
    New,
    List,
    Search(String),
    Select(usize),
    Delete(Option<usize>),
    Rename(String),
    History,
    Edit { index: usize, text: String },
    Resend,
    Attach(PathBuf),
    Detach(String),
    Dictate,
    Logout,
    Help,
    Quit,
    Empty,
    Invalid(String),
}

/// Whether the loop should keep reading input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

pub fn parse_command(line: &str) -> Command {
    let line = line.trim();
    if line.is_empty() {
        return Command::Empty;
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Command::Send(line.to_string());
    };

    let (name, arg) = match rest.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (rest, ""),
    };

    match name {
        "new" => Command::New,
        "list" => Command::List,
        "search" => Command::Search(arg.to_string()),
        "select" => match parse_index(arg) {
            Some(n) => Command::Select(n),
            None => Command::Invalid("usage: /select <n>".into()),
        },
        "delete" if arg.is_empty() => Command::Delete(None),
        "delete" => match parse_index(arg) {
            Some(n) => Command::Delete(Some(n)),
            None => Command::Invalid("usage: /delete [n]".into()),
        },
        "rename" if !arg.is_empty() => Command::Rename(arg.to_string()),
        "history" => Command::History,
        "edit" => {
            let parsed = arg
                .split_once(char::is_whitespace)
                .and_then(|(n, text)| Some((parse_index(n)?, text.trim())))
                .filter(|(_, text)| !text.is_empty());
            match parsed {
                Some((index, text)) => Command::Edit {
                    index,
                    text: text.to_string(),
                },
                None => Command::Invalid("usage: /edit <n> <text>".into()),
            }
        }
        "resend" => Command::Resend,
        "attach" if !arg.is_empty() => Command::Attach(PathBuf::from(arg)),
        "detach" if !arg.is_empty() => Command::Detach(arg.to_string()),
        "dictate" => Command::Dictate,
        "logout" => Command::Logout,
        "help" => Command::Help,
        "quit" | "exit" => Command::Quit,
        _ => Command::Invalid(format!("unknown command: /{} (try /help)", name)),
    }
}

/// 1-based list position to 0-based index.
fn parse_index(arg: &str) -> Option<usize> {
    arg.parse::<usize>().ok().filter(|n| *n > 0).map(|n| n - 1)
}

/// Prints notifications to the terminal.
#[derive(Debug, Default)]
pub struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
    fn notify(&self, n: Notification) {
        let marker = match n.severity {
            Severity::Info => "*",
            Severity::Error => "!",
        };
        if n.description.is_empty() {
            println!("{} {}", marker, n.title);
        } else {
            println!("{} {}: {}", marker, n.title, n.description);
        }
    }
}

// =============================================================================
// Execution
// =============================================================================

pub async fn execute(orch: &ChatOrchestrator, session: &Session, command: Command) -> Flow {
    match command {
        Command::Empty => {}
        Command::Send(text) => {
            orch.set_draft(text);
            send(orch).await;
        }
        Command::New => {
            orch.new_conversation();
            println!("Started a new chat.");
        }
        Command::List => print_list(orch, ""),
        Command::Search(query) => print_list(orch, &query),
        Command::Select(index) => match conversation_id_at(orch, index) {
            Some(id) => {
                if orch.select_conversation(&id).is_ok() {
                    print_history(orch);
                }
            }
            None => println!("No chat {}.", index + 1),
        },
        Command::Delete(index) => {
            let id = match index {
                Some(i) => conversation_id_at(orch, i),
                None => orch.with_store(|s| s.active_id().map(str::to_string)),
            };
            match id {
                Some(id) => {
                    orch.delete_conversation(&id);
                }
                None => println!("Nothing to delete."),
            }
        }
        Command::Rename(title) => match active_id(orch) {
            Some(id) => orch.rename_conversation(&id, &title),
            None => println!("No active chat."),
        },
        Command::History => print_history(orch),
        Command::Edit { index, text } => {
            let target = orch.with_store(|s| {
                let conv = s.active_conversation()?;
                let msg = conv.messages.get(index)?;
                Some((conv.id.clone(), msg.id.clone()))
            });
            match target {
                Some((conv_id, msg_id)) => {
                    orch.start_editing(&conv_id, &msg_id);
                    orch.edit_message(&conv_id, &msg_id, &text);
                    println!("Message {} updated. Use /resend to get a new reply.", index + 1);
                }
                None => println!("No message {}.", index + 1),
            }
        }
        Command::Resend => match active_id(orch) {
            Some(id) => report(orch, orch.resend(&id).await),
            None => println!("No active chat."),
        },
        Command::Attach(path) => match SelectedFile::from_path(&path).await {
            Ok(file) => {
                if let Ok(desc) = orch.add_attachment(&file).await {
                    println!(
                        "Attached {} ({}) as {}",
                        desc.name,
                        format_file_size(desc.size),
                        desc.id
                    );
                }
            }
            Err(e) => println!("! {}", e),
        },
        Command::Detach(id) => {
            if !orch.remove_attachment(&id) {
                println!("No staged attachment {}.", id);
            }
        }
        Command::Dictate => {
            if let DictationOutcome::Transcribed(text) = orch.toggle_dictation().await {
                println!("Heard: {}", text);
                println!("Draft: {}", orch.draft());
            }
        }
        Command::Logout => {
            if orch.logout(session) == Redirect::Landing {
                println!("Goodbye.");
            }
            return Flow::Exit;
        }
        Command::Help => println!("{}", HELP),
        Command::Quit => return Flow::Exit,
        Command::Invalid(msg) => println!("{}", msg),
    }
    Flow::Continue
}

async fn send(orch: &ChatOrchestrator) {
    let mut outcome = orch.send().await;
    if let SendOutcome::ConversationCreated { .. } = outcome {
        outcome = orch.send().await;
    }
    report(orch, outcome);
}

fn report(orch: &ChatOrchestrator, outcome: SendOutcome) {
    match outcome {
        SendOutcome::Succeeded { message_id } => {
            let reply = orch.with_store(|s| {
                s.active_conversation()
                    .and_then(|c| c.messages.iter().find(|m| m.id == message_id))
                    .map(|m| m.content.clone())
            });
            if let Some(reply) = reply {
                println!("\nWGPT: {}\n", reply);
            }
        }
        SendOutcome::Ignored => println!("Nothing to send."),
        SendOutcome::Discarded => println!("Reply dropped: the chat changed while waiting."),
        SendOutcome::Failed | SendOutcome::ConversationCreated { .. } => {}
    }
}

fn active_id(orch: &ChatOrchestrator) -> Option<String> {
    orch.with_store(|s| s.active_id().map(str::to_string))
}

fn conversation_id_at(orch: &ChatOrchestrator, index: usize) -> Option<String> {
    orch.with_store(|s| s.list_conversations().get(index).map(|c| c.id.clone()))
}

fn print_list(orch: &ChatOrchestrator, query: &str) {
    let now = Utc::now();
    orch.with_store(|s| {
        let active = s.active_id();
        let all = s.list_conversations();
        let hits = s.search_conversations(query);
        if hits.is_empty() {
            println!("No chats.");
        }
        for conv in hits {
            let position = all.iter().position(|c| c.id == conv.id).unwrap_or(0) + 1;
            let marker = if Some(conv.id.as_str()) == active { ">" } else { " " };
            println!(
                "{} {}. {} ({})",
                marker,
                position,
                conv.title,
                relative_date(conv.updated_at, now)
            );
        }
    });
}

fn print_history(orch: &ChatOrchestrator) {
    orch.with_store(|s| {
        let Some(conv) = s.active_conversation() else {
            println!("No active chat.");
            return;
        };
        println!("== {} ==", conv.title);
        for (i, msg) in conv.messages.iter().enumerate() {
            let who = match msg.role {
                Role::User => "You",
                Role::Assistant => "WGPT",
            };
            println!("[{}] {}: {}", i + 1, who, msg.content);
        }
    });
}
