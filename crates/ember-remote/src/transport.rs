// ── Transport abstraction ──
//
// The connection logic talks to the service through a pair of framed
// channels rather than a socket directly. In production the pair is
// bridged to a WebSocket (see `ws`); tests drive a connection with an
// in-memory pair and script the server side.

use secrecy::SecretString;
use tokio::sync::mpsc;
use url::Url;

use crate::error::Error;
use crate::protocol::{ClientMessage, ServerMessage};

/// Frame buffering between the connection and the link task.
pub(crate) const FRAME_CHANNEL_CAPACITY: usize = 256;

/// How to reach and authenticate with the service.
#[derive(Debug, Clone)]
pub struct Credentials {
    /// Service endpoint (e.g. `wss://sync.ember.app/v1`).
    pub url: Url,
    /// Wallet-derived session token, sent as a bearer header.
    pub token: SecretString,
}

/// A live framed link to the service.
///
/// `Err` frames carry link-level failures (socket read errors). Dropping
/// `incoming`'s sender half (the link task, on socket close) is how
/// disconnection reaches the connection's dispatch loop.
pub struct TransportPair {
    pub outgoing: mpsc::Sender<ClientMessage>,
    pub incoming: mpsc::Receiver<Result<ServerMessage, Error>>,
}

/// The far side of an in-memory transport: what a scripted "server"
/// holds. Send on `incoming` to deliver frames to the client; read
/// `outgoing` to observe what the client submitted.
pub struct RemoteEnd {
    pub incoming: mpsc::Sender<Result<ServerMessage, Error>>,
    pub outgoing: mpsc::Receiver<ClientMessage>,
}

impl TransportPair {
    /// An in-memory link with no socket behind it.
    pub fn in_memory() -> (Self, RemoteEnd) {
        let (outgoing_tx, outgoing_rx) = mpsc::channel(FRAME_CHANNEL_CAPACITY);
        let (incoming_tx, incoming_rx) = mpsc::channel(FRAME_CHANNEL_CAPACITY);

        (
            Self {
                outgoing: outgoing_tx,
                incoming: incoming_rx,
            },
            RemoteEnd {
                incoming: incoming_tx,
                outgoing: outgoing_rx,
            },
        )
    }
}
