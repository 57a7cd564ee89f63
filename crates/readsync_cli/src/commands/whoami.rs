//! Whoami command implementation.

use super::RemoteOptions;
use readsync_engine::RemoteApi;

/// Runs the whoami command.
pub async fn run(remote: &RemoteOptions) -> Result<(), Box<dyn std::error::Error>> {
    let client = remote.client()?;
    let user = client.me().await?;
    println!("Connected as {} (id {})", user.username, user.id);
    Ok(())
}
