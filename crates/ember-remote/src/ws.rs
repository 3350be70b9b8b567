// ── WebSocket transport ──
//
// Bridges a `TransportPair` to the service's WebSocket endpoint.
// One task per link: outgoing frames are serialized onto the socket,
// incoming text frames are parsed and forwarded. There is no automatic
// reconnect -- when the socket drops, the incoming channel closes and
// the owner decides what to do next.

use futures_util::{SinkExt, StreamExt};
use secrecy::ExposeSecret;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{self, ClientRequestBuilder};
use tracing::{debug, info, trace, warn};

use crate::error::Error;
use crate::protocol::{ClientMessage, ServerMessage};
use crate::transport::{Credentials, TransportPair, FRAME_CHANNEL_CAPACITY};

/// Open a WebSocket to the service and spawn the bridge task.
///
/// Resolves once the socket handshake completes. The returned pair is
/// live immediately; frames sent before the first server message are
/// queued on the socket.
pub async fn connect(credentials: &Credentials) -> Result<TransportPair, Error> {
    let url = &credentials.url;
    info!(url = %url, "connecting to sync service");

    let uri: tungstenite::http::Uri = url
        .as_str()
        .parse()
        .map_err(|e: tungstenite::http::uri::InvalidUri| Error::InvalidUrl(e.to_string()))?;

    let request = ClientRequestBuilder::new(uri).with_header(
        "Authorization",
        format!("Bearer {}", credentials.token.expose_secret()),
    );

    let (ws_stream, _response) =
        tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| match e {
                tungstenite::Error::Http(ref resp) if resp.status().as_u16() == 401 => {
                    Error::Unauthorized
                }
                other => Error::Connect {
                    url: url.to_string(),
                    reason: other.to_string(),
                },
            })?;

    info!("sync service connected");

    let (outgoing_tx, outgoing_rx) = mpsc::channel(FRAME_CHANNEL_CAPACITY);
    let (incoming_tx, incoming_rx) = mpsc::channel(FRAME_CHANNEL_CAPACITY);

    tokio::spawn(bridge(ws_stream, outgoing_rx, incoming_tx));

    Ok(TransportPair {
        outgoing: outgoing_tx,
        incoming: incoming_rx,
    })
}

/// Pump frames in both directions until the socket or the owner goes away.
async fn bridge<S>(
    ws_stream: tokio_tungstenite::WebSocketStream<S>,
    mut outgoing: mpsc::Receiver<ClientMessage>,
    incoming: mpsc::Sender<Result<ServerMessage, Error>>,
) where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            msg = outgoing.recv() => {
                // Owner dropped the pair: close the socket politely.
                let Some(msg) = msg else {
                    let _ = write.send(tungstenite::Message::Close(None)).await;
                    break;
                };
                let text = match serde_json::to_string(&msg) {
                    Ok(t) => t,
                    Err(e) => {
                        warn!(error = %e, "failed to serialize outgoing frame");
                        continue;
                    }
                };
                if let Err(e) = write.send(tungstenite::Message::Text(text.into())).await {
                    warn!(error = %e, "socket write failed");
                    break;
                }
            }
            frame = read.next() => {
                match frame {
                    Some(Ok(tungstenite::Message::Text(text))) => {
                        match serde_json::from_str::<ServerMessage>(&text) {
                            Ok(msg) => {
                                if incoming.send(Ok(msg)).await.is_err() {
                                    // Dispatch loop is gone; nothing left to feed.
                                    break;
                                }
                            }
                            Err(e) => {
                                debug!(error = %e, "unparseable frame from service, skipping");
                            }
                        }
                    }
                    Some(Ok(tungstenite::Message::Ping(_))) => {
                        // tungstenite answers pongs automatically
                        trace!("socket ping");
                    }
                    Some(Ok(tungstenite::Message::Close(frame))) => {
                        if let Some(ref cf) = frame {
                            info!(code = %cf.code, reason = %cf.reason, "close frame received");
                        } else {
                            info!("close frame received (no payload)");
                        }
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "socket read failed");
                        let _ = incoming
                            .send(Err(Error::Link {
                                reason: e.to_string(),
                            }))
                            .await;
                        break;
                    }
                    None => {
                        info!("socket stream ended");
                        break;
                    }
                    _ => {
                        // Binary, Pong, Frame -- ignore
                    }
                }
            }
        }
    }

    // Dropping `incoming` here closes the channel, which the dispatch
    // loop observes as disconnection.
    debug!("transport bridge exiting");
}
