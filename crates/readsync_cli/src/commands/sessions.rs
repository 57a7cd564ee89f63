//! Sessions command implementation.

use super::RemoteOptions;
use readsync_engine::RemoteApi;
use readsync_protocol::ReadSession;

/// Runs the sessions command.
pub async fn run(
    remote: &RemoteOptions,
    link_id: i64,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let client = remote.client()?;
    let sessions = client.list_read_sessions(link_id).await?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&sessions)?),
        _ => print_text_output(link_id, &sessions),
    }
    Ok(())
}

fn print_text_output(link_id: i64, sessions: &[ReadSession]) {
    println!("=== Read sessions of library entry {} ===", link_id);
    if sessions.is_empty() {
        println!("(none)");
        return;
    }
    for session in sessions {
        let started = session
            .started_at
            .map(|d| d.to_string())
            .unwrap_or_else(|| "-".to_string());
        let finished = session
            .finished_at
            .map(|d| d.to_string())
            .unwrap_or_else(|| "active".to_string());
        println!(
            "{:>8}  page {:>5}  started {}  {}",
            session.id,
            session.progress(),
            started,
            finished
        );
    }
    if sessions.len() > 1 {
        println!();
        println!("{} sessions; run `readsync dedupe {}` to keep one", sessions.len(), link_id);
    }
}
