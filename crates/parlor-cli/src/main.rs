use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, bail};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use parlor_client::{
    ChatClient, ClientConfig, ConversationSession, FeedUpdate, FileCredentialStore, SubscriptionNotice, SyncError,
};
use parlor_types::models::{Message, RoomId, UserId};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "parlor=info,parlor_client=debug".into()),
        )
        .init();

    let config = ClientConfig::from_env()?;
    let credentials = Arc::new(FileCredentialStore::open(&config.credential_path)?);
    let client = ChatClient::new(config, credentials)?;

    let room = RoomId(env_parse("PARLOR_ROOM_ID")?.unwrap_or(1));
    let user_id = sign_in(&client).await?;

    let session = client
        .enter(room, user_id)
        .await
        .with_context(|| format!("failed to enter room {}", room))?;
    for message in session.feed().snapshot() {
        print_message(&message);
    }
    println!("-- /more for older messages, /logout, /quit --");

    let result = run(&client, &session).await;
    session.leave().await;
    result
}

/// Log in with PARLOR_EMAIL/PARLOR_PASSWORD, or reuse a stored credential
/// together with PARLOR_USER_ID.
async fn sign_in(client: &ChatClient) -> anyhow::Result<UserId> {
    let email = std::env::var("PARLOR_EMAIL").ok();
    let password = std::env::var("PARLOR_PASSWORD").ok();

    if let (Some(email), Some(password)) = (email, password) {
        let user = client.auth().login(&email, &password).await?;
        return Ok(user.id);
    }

    match env_parse::<i64>("PARLOR_USER_ID")? {
        Some(id) if client.auth().is_logged_in() => {
            info!("Using stored credential for user {}", id);
            Ok(UserId(id))
        }
        _ => bail!("set PARLOR_EMAIL and PARLOR_PASSWORD, or PARLOR_USER_ID with a stored credential"),
    }
}

async fn run(client: &ChatClient, session: &ConversationSession) -> anyhow::Result<()> {
    let mut updates = session.feed().updates();
    let mut notices = session.subscription().notices();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match line.trim() {
                    "" => {}
                    "/quit" => break,
                    "/logout" => {
                        client.auth().logout()?;
                        println!("-- logged out; the open stream stays up until it reconnects --");
                    }
                    "/more" => match session.load_older().await {
                        Ok(summary) => {
                            for message in session.feed().snapshot().iter().take(summary.loaded) {
                                print_message(message);
                            }
                            println!("-- {} older messages --", summary.loaded);
                        }
                        Err(SyncError::NoOlderPage) => println!("-- start of conversation --"),
                        Err(e) => warn!("{}", e),
                    },
                    text => {
                        if let Err(e) = session.send(text).await {
                            warn!("Message not sent: {}", e);
                        }
                    }
                }
            }
            update = updates.recv() => match update {
                Ok(FeedUpdate::Appended(message)) => print_message(&message),
                Ok(_) => {}
                Err(RecvError::Lagged(n)) => warn!("Skipped {} feed updates", n),
                Err(RecvError::Closed) => break,
            },
            notice = notices.recv() => {
                if let Ok(SubscriptionNotice::ConnectionDegraded { attempt, reason, retry_in }) = notice {
                    eprintln!("-- connection lost ({}); retry {} in {:?} --", reason, attempt, retry_in);
                }
            }
        }
    }

    Ok(())
}

fn print_message(message: &Message) {
    println!(
        "[{}] {}: {}",
        message.timestamp.format("%H:%M:%S"),
        message.sender.name,
        message.content
    );
}

fn env_parse<T>(var: &str) -> anyhow::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(var) {
        Ok(value) => Ok(Some(
            value
                .trim()
                .parse()
                .with_context(|| format!("invalid value '{}' for {}", value, var))?,
        )),
        Err(_) => Ok(None),
    }
}
