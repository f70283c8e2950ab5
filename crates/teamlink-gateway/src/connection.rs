use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{Instant, Interval, MissedTickBehavior, Sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use teamlink_types::events::Payload;

use crate::client::{ClientInner, ConnectionStatus, LinkHandle, Routes};
use crate::connector::Link;
use crate::error::TransportError;
use crate::frame::{self, Command, Frame, HEARTBEAT};
use crate::listeners::ConnectionEvent;
use crate::options::{ConnectOptions, Heartbeats};
use crate::token::TokenProvider;

/// Connect, run the session, and reconnect after the configured delay until
/// cancelled or reconnecting is disabled.
pub(crate) async fn supervise(
    client: Arc<ClientInner>,
    endpoint: String,
    token: TokenProvider,
    options: ConnectOptions,
    cancel: CancellationToken,
) {
    loop {
        client.set_status(ConnectionStatus::Connecting);

        let attempt = tokio::select! {
            _ = cancel.cancelled() => break,
            result = tokio::time::timeout(options.connect_timeout, establish(&client, &endpoint, &token, &options)) => {
                result.unwrap_or(Err(TransportError::Timeout(options.connect_timeout)))
            }
        };

        match attempt {
            Ok((link, connected)) => {
                let heartbeats = options.negotiate(connected.header("heart-beat"));
                let generation = client.next_generation();
                let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
                let routes: Routes = Arc::new(Mutex::new(HashMap::new()));
                client.install_link(LinkHandle {
                    generation,
                    outbound: outbound_tx,
                    routes: routes.clone(),
                    resolver: options.destinations.clone(),
                });
                client.set_status(ConnectionStatus::Connected);
                info!(
                    "Connected to {} (generation {}, heartbeats out {:?} in {:?})",
                    endpoint, generation, heartbeats.outgoing, heartbeats.incoming
                );
                client.emit(ConnectionEvent::Open { generation });

                let ended = run_session(link, outbound_rx, routes, heartbeats, &cancel).await;
                client.clear_link(Some(generation));
                match ended {
                    Ok(reason) => {
                        info!("Connection closed: {}", reason);
                        client.set_status(ConnectionStatus::Disconnected);
                        client.emit(ConnectionEvent::Close { reason });
                    }
                    Err(error) => {
                        warn!("Connection lost: {}", error);
                        let reason = error.to_string();
                        client.set_status(ConnectionStatus::Error);
                        client.emit(ConnectionEvent::Error {
                            error: Arc::new(error),
                        });
                        client.emit(ConnectionEvent::Close { reason });
                    }
                }
            }
            Err(error) => {
                warn!("Connection attempt to {} failed: {}", endpoint, error);
                client.set_status(ConnectionStatus::Error);
                client.emit(ConnectionEvent::Error {
                    error: Arc::new(error),
                });
            }
        }

        if cancel.is_cancelled() {
            break;
        }
        if !options.auto_reconnect() {
            debug!("Auto-reconnect disabled, staying down");
            break;
        }
        info!("Reconnecting in {:?}", options.reconnect_delay);
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(options.reconnect_delay) => {}
        }
    }
}

/// Open the link and complete the CONNECT/CONNECTED handshake.
async fn establish(
    client: &ClientInner,
    endpoint: &str,
    token: &TokenProvider,
    options: &ConnectOptions,
) -> Result<(Link, Frame), TransportError> {
    let token = token.resolve().await?;
    let mut link = client.connector().open(endpoint).await?;

    let connect = Frame::connect(&options.host, options.heart_beat_header(), &token);
    link.sink.send(connect.encode()).await?;

    loop {
        let text = match link.stream.next().await {
            Some(text) => text?,
            None => return Err(TransportError::Closed),
        };
        if frame::is_heartbeat(&text) {
            continue;
        }
        let frame = Frame::decode(&text)?;
        match frame.command {
            Command::Connected => return Ok((link, frame)),
            Command::Error => return Err(TransportError::Rejected(error_text(&frame))),
            other => debug!("Ignoring {} before CONNECTED", other),
        }
    }
}

/// Pump one connected session. `Ok` carries the close reason for an orderly
/// end, `Err` anything that broke the link.
async fn run_session(
    link: Link,
    mut outbound: mpsc::UnboundedReceiver<Frame>,
    routes: Routes,
    heartbeats: Heartbeats,
    cancel: &CancellationToken,
) -> Result<String, TransportError> {
    let Link {
        mut sink,
        mut stream,
    } = link;

    let mut send_tick = heartbeats.outgoing.map(|period| {
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval
    });
    // Nothing received for twice the incoming period means the broker is gone.
    let silence = heartbeats.incoming.map(|period| period * 2);
    let mut watchdog: Option<Pin<Box<Sleep>>> = silence.map(|s| Box::pin(tokio::time::sleep(s)));

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = sink.send(Frame::disconnect().encode()).await;
                let _ = sink.close().await;
                return Ok("disconnected by client".into());
            }
            command = outbound.recv() => {
                let Some(frame) = command else {
                    return Ok("client dropped".into());
                };
                trace!("-> {}", frame.command);
                sink.send(frame.encode()).await?;
            }
            incoming = stream.next() => {
                let text = match incoming {
                    Some(text) => text?,
                    None => return Ok("closed by broker".into()),
                };
                if let (Some(sleep), Some(period)) = (watchdog.as_mut(), silence) {
                    sleep.as_mut().reset(Instant::now() + period);
                }
                if frame::is_heartbeat(&text) {
                    trace!("<- heartbeat");
                    continue;
                }
                match Frame::decode(&text) {
                    Ok(frame) => dispatch(&routes, frame)?,
                    Err(e) => warn!("Dropping undecodable frame: {}", e),
                }
            }
            _ = tick(&mut send_tick) => {
                sink.send(HEARTBEAT.to_string()).await?;
            }
            _ = expired(&mut watchdog) => {
                let period = silence.unwrap_or(Duration::ZERO);
                warn!("No traffic from broker for {:?}, dropping connection", period);
                return Err(TransportError::HeartbeatTimeout(period));
            }
        }
    }
}

/// Hand one inbound frame to its subscription. The handler runs with no
/// lock held so it may call back into the client.
fn dispatch(routes: &Routes, frame: Frame) -> Result<(), TransportError> {
    match frame.command {
        Command::Message => {
            let Some(id) = frame.header("subscription") else {
                debug!("MESSAGE without subscription header");
                return Ok(());
            };
            let handler = routes
                .lock()
                .expect("routes lock poisoned")
                .get(id)
                .map(|route| route.handler.clone());
            let Some(handler) = handler else {
                debug!("MESSAGE for unknown subscription {}", id);
                return Ok(());
            };
            let payload = match frame.body_text() {
                Ok(text) => Payload::parse(text),
                Err(_) => Payload::Raw(String::from_utf8_lossy(&frame.body).into_owned()),
            };
            trace!("<- MESSAGE on {}", id);
            handler(payload);
            Ok(())
        }
        Command::Receipt => {
            debug!("Receipt {}", frame.header("receipt-id").unwrap_or("?"));
            Ok(())
        }
        Command::Error => Err(TransportError::Broker(error_text(&frame))),
        other => {
            debug!("Ignoring unexpected {}", other);
            Ok(())
        }
    }
}

fn error_text(frame: &Frame) -> String {
    let message = frame.header("message").unwrap_or_default();
    let body = String::from_utf8_lossy(&frame.body);
    match (message.is_empty(), body.trim().is_empty()) {
        (false, false) => format!("{}: {}", message, body.trim()),
        (false, true) => message.to_string(),
        (true, false) => body.trim().to_string(),
        (true, true) => "unspecified".into(),
    }
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn expired(sleep: &mut Option<Pin<Box<Sleep>>>) {
    match sleep {
        Some(sleep) => sleep.as_mut().await,
        None => std::future::pending().await,
    }
}
