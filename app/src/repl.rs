//! Interactive chat REPL.
//!
//! Seeds the screen with the stored conversation history, then bridges
//! stdin lines to the chat store and prints inbound messages as they land.

use anyhow::Result;
use burrow_core::api::ApiClient;
use burrow_core::chat::ChatStore;
use burrow_core::session::SessionStore;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;

pub async fn run(
    chat: ChatStore,
    api: &ApiClient,
    session: &SessionStore,
    counterpart: String,
) -> Result<()> {
    let me = session
        .user_id()
        .ok_or_else(|| anyhow::anyhow!("sign in before starting a chat"))?;

    match api.conversation_history(&counterpart).await {
        Ok(history) => {
            if let Some(messages) = history.as_array() {
                for message in messages {
                    print_history_line(message);
                }
            }
        }
        Err(err) => tracing::warn!(%err, "could not fetch conversation history"),
    }

    chat.connect().await?;
    chat.set_active_chat(&counterpart);

    // Print inbound messages for the active chat; skip our own optimistic
    // copies, which the prompt already showed.
    let printed = Arc::new(Mutex::new(0usize));
    let own_id = me.clone();
    let counter = printed.clone();
    let _subscription = chat.subscribe(move |state| {
        let mut printed = counter.lock();
        for message in state.messages.iter().skip(*printed) {
            if message.sender.id != own_id {
                println!(
                    "[{}] {}: {}",
                    message.timestamp.format("%H:%M"),
                    message.sender.id,
                    message.content
                );
            }
        }
        *printed = state.messages.len();
    });

    eprintln!("Chatting with {counterpart}. Type /help for commands, /exit to quit.");
    loop {
        let Some(line) = read_line().await else {
            eprintln!();
            break;
        };
        let line = line.trim().to_string();
        match line.as_str() {
            "" => continue,
            "/exit" | "/quit" => break,
            "/help" => print_help(),
            _ => {
                if let Err(err) = chat.send_message(&counterpart, line) {
                    eprintln!("send failed: {err}");
                }
            }
        }
    }

    chat.disconnect();
    Ok(())
}

fn print_history_line(message: &Value) {
    let sender = message
        .get("sender")
        .and_then(|sender| sender.get("id"))
        .and_then(Value::as_str)
        .unwrap_or("?");
    let content = message
        .get("content")
        .and_then(Value::as_str)
        .unwrap_or_default();
    println!("{sender}: {content}");
}

fn print_help() {
    eprintln!("Commands:");
    eprintln!("  /help           show this help");
    eprintln!("  /exit, /quit    leave the chat");
    eprintln!("Anything else is sent as a message.");
}

/// Read a line from stdin in a blocking task, with a prompt on stderr.
async fn read_line() -> Option<String> {
    tokio::task::spawn_blocking(|| {
        use std::io::Write;
        let mut stderr = std::io::stderr();
        let _ = stderr.write_all(b"> ");
        let _ = stderr.flush();
        let mut line = String::new();
        match std::io::stdin().read_line(&mut line) {
            Ok(0) => None,
            Ok(_) => Some(line),
            Err(err) => {
                eprintln!("error reading stdin: {err}");
                None
            }
        }
    })
    .await
    .ok()
    .flatten()
}
