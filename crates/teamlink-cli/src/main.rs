mod config;

use std::collections::HashSet;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use teamlink_api::HistoryClient;
use teamlink_gateway::{
    ConnectionEvent, ConnectionEventKind, SubscriptionRegistry, TokenProvider, TransportClient,
};
use teamlink_sync::{Draft, RoomContext, RoomSession, UnreadAggregator};
use teamlink_types::models::{ChatMessage, ChatSeq};

use config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "teamlink=info,teamlink_gateway=info,teamlink_sync=info".into()
            }),
        )
        .init();

    let config = Config::from_env()?;

    // Transport and registry
    let client = TransportClient::websocket();
    let registry = SubscriptionRegistry::new(client.clone());
    client.on(ConnectionEventKind::Error, |event| {
        if let ConnectionEvent::Error { error } = event {
            warn!("Connection error: {}", error);
        }
    });

    let unread = UnreadAggregator::new(registry.clone());
    unread.set_joined_rooms(config.joined_rooms.iter().copied());
    unread.set_active_room(Some(config.room_seq));

    let token = TokenProvider::from(config.token.clone());
    let history = Arc::new(HistoryClient::new(&config.api_url, token.clone()));
    let session = RoomSession::new(
        RoomContext {
            room_seq: config.room_seq,
            room_name: config.room_name.clone(),
            me: config.member_seq,
            my_name: config.member_name.clone(),
            participants: Vec::new(),
        },
        registry.clone(),
        history,
    );

    client.connect(&config.ws_url, token, config.connect_options());
    session.open().await?;

    let mut printed = HashSet::new();
    print_new(&session, &mut printed);
    info!("Room {} ready, {} joined rooms", config.room_seq, config.joined_rooms.len());

    // Timeline changes
    let mut updates = session.updates();
    let printer = {
        let session = session.clone();
        tokio::spawn(async move {
            while updates.changed().await.is_ok() {
                print_new(&session, &mut printed);
            }
        })
    };

    // Unread badge
    let mut badge = unread.watch();
    let counter = tokio::spawn(async move {
        while badge.changed().await.is_ok() {
            let count = *badge.borrow_and_update();
            println!("[unread: {}]", count);
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        match line {
            "" => {}
            "/quit" => break,
            "/older" => match session.load_older().await {
                Ok(0) => println!("(no older messages)"),
                Ok(n) => info!("Loaded {} older messages", n),
                Err(e) => warn!("Could not load older messages: {}", e),
            },
            "/read" => {
                if !session.mark_latest_read() {
                    warn!("Nothing marked read");
                }
            }
            text => {
                let outcome = session.send(Draft::text(text))?;
                if !outcome.published {
                    println!("(offline, message {} not sent)", outcome.placeholder_seq);
                }
            }
        }
    }

    printer.abort();
    counter.abort();
    session.close();
    client.disconnect().await;
    info!("Bye");
    Ok(())
}

/// Print messages not shown yet, oldest first.
fn print_new(session: &RoomSession, printed: &mut HashSet<ChatSeq>) {
    let snapshot = session.snapshot();
    for message in snapshot.iter().rev() {
        if printed.insert(message.chat_seq) {
            println!("{}", render(message));
        }
    }
}

fn render(message: &ChatMessage) -> String {
    let sender = message.sender_name.as_deref().unwrap_or("?");
    let body = if message.deleted {
        "(deleted)".to_string()
    } else if let Some(emoji) = &message.emoji {
        format!(":{}:", emoji)
    } else {
        message.content.clone()
    };
    let id = if message.is_optimistic() {
        "pending".to_string()
    } else {
        message.chat_seq.to_string()
    };
    format!(
        "[{}] {} <{}> {}",
        message.created_at.format("%H:%M"),
        id,
        sender,
        body
    )
}
