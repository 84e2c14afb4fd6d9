//! The four user-facing operations

use anyhow::{Context, Result};
use i2chat_sam::{
    spawn_accept, spawn_connect, Identity, SamConfig, SamConnection, SamStream, Session,
    StreamTask,
};
use tracing::{info, warn};

use crate::address;

/// Create a STREAM session and keep it alive until Ctrl-C.
pub async fn create_session(
    connection: SamConnection,
    config: &SamConfig,
    session_id: &str,
    identity: Identity,
) -> Result<()> {
    let session = Session::create(connection, session_id, identity, config.signature_type)
        .await
        .context("Unable to create SAM session")?;

    println!("Session {} successfully created!", session.id());
    println!("Keep this running while peers connect; press Ctrl-C to end the session.");

    tokio::signal::ctrl_c().await?;
    session.close().await;
    Ok(())
}

pub fn show_address(identity: &Identity) -> Result<()> {
    let address = address::b32_address(identity.public_destination())
        .context("Error converting destination into public address")?;
    println!("Your public address is: {}", address);
    Ok(())
}

pub async fn accept(config: &SamConfig, session_id: &str, relay: bool) -> Result<()> {
    let task = spawn_accept(config.clone(), session_id.to_string());
    let stream = wait(task).await.context("Error accepting stream")?;

    println!(
        "Successfully accepted incoming stream from {}",
        stream.remote_destination().unwrap_or("an unknown peer")
    );
    if relay {
        relay_stdio(stream).await?;
    }
    Ok(())
}

pub async fn connect(
    config: &SamConfig,
    session_id: &str,
    destination: &str,
    relay: bool,
) -> Result<()> {
    let task = spawn_connect(
        config.clone(),
        session_id.to_string(),
        destination.to_string(),
    );
    let stream = wait(task)
        .await
        .context("Error connecting to external stream")?;

    println!("Successfully connected to external stream!");
    if relay {
        relay_stdio(stream).await?;
    }
    Ok(())
}

/// Join the task, closing its connection if the user hits Ctrl-C first.
async fn wait(task: StreamTask<SamStream>) -> i2chat_sam::Result<SamStream> {
    let close = task.close_handle();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, closing stream operation");
            close.close();
        }
    });

    let result = task.join().await;
    interrupt.abort();
    result
}

/// Pipe stdin to the stream and the stream to stdout until either side ends.
async fn relay_stdio(stream: SamStream) -> Result<()> {
    let (mut reader, mut writer) = stream.into_split();
    let mut stdin = tokio::io::stdin();
    let mut stdout = tokio::io::stdout();

    info!("Relaying stdin/stdout over the stream");
    tokio::select! {
        received = tokio::io::copy(&mut reader, &mut stdout) => {
            let bytes = received.context("Stream read failed")?;
            info!("Peer closed the stream after {} bytes", bytes);
        }
        sent = tokio::io::copy(&mut stdin, &mut writer) => {
            let bytes = sent.context("Stream write failed")?;
            info!("Input closed after sending {} bytes", bytes);
        }
    }
    Ok(())
}
