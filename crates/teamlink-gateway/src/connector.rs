use std::pin::Pin;

use futures_util::future::{self, BoxFuture};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::debug;

use crate::error::TransportError;

pub type LinkSink = Pin<Box<dyn Sink<String, Error = TransportError> + Send>>;
pub type LinkStream = Pin<Box<dyn Stream<Item = Result<String, TransportError>> + Send>>;

/// A duplex of text frames. Each item is one websocket text message.
pub struct Link {
    pub sink: LinkSink,
    pub stream: LinkStream,
}

/// Opens the physical link to the broker.
pub trait Connector: Send + Sync + 'static {
    fn open(&self, endpoint: &str) -> BoxFuture<'static, Result<Link, TransportError>>;
}

/// Production connector backed by tokio-tungstenite.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

impl Connector for WebSocketConnector {
    fn open(&self, endpoint: &str) -> BoxFuture<'static, Result<Link, TransportError>> {
        let endpoint = endpoint.to_string();
        Box::pin(async move {
            let (ws, response) =
                connect_async(endpoint.as_str())
                    .await
                    .map_err(|e| TransportError::Connect {
                        endpoint: endpoint.clone(),
                        reason: e.to_string(),
                    })?;
            debug!("Websocket upgrade to {} answered {}", endpoint, response.status());

            let (write, read) = ws.split();
            let sink = write
                .sink_map_err(|e| TransportError::Io(e.to_string()))
                .with(|text: String| future::ready(Ok::<_, TransportError>(Message::Text(text.into()))));
            let stream = read.filter_map(|msg| {
                future::ready(match msg {
                    Ok(Message::Text(text)) => Some(Ok(text.as_str().to_owned())),
                    Ok(Message::Binary(data)) => Some(
                        String::from_utf8(data.to_vec())
                            .map_err(|_| TransportError::Io("binary frame is not UTF-8".into())),
                    ),
                    // Ping/pong are answered by tungstenite; Close ends the stream.
                    Ok(_) => None,
                    Err(e) => Some(Err(TransportError::Io(e.to_string()))),
                })
            });

            Ok(Link {
                sink: Box::pin(sink),
                stream: Box::pin(stream),
            })
        })
    }
}
