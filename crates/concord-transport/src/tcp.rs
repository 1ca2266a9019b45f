//! TCP links to the static neighbor set

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use concord_core::{ConcordError, ConcordResult, NeighborDown, NeighborUp, PeerId};
use concord_wire::{encode_frame, FrameDecoder, WireMessage};

use crate::handshake::handshake;
use crate::{TransportConfig, TransportEvent};

/// Receiver side of the event channel
pub type EventReceiver = mpsc::Receiver<TransportEvent>;

/// Reads whole frames off a byte stream
pub struct FramedReader<R> {
    inner: R,
    decoder: FrameDecoder,
}

impl<R: AsyncRead + Unpin> FramedReader<R> {
    pub fn new(inner: R) -> Self {
        FramedReader {
            inner,
            decoder: FrameDecoder::new(),
        }
    }

    /// Next frame body; `None` on a clean end of stream
    pub async fn next_frame(&mut self) -> ConcordResult<Option<Bytes>> {
        loop {
            if let Some(frame) = self.decoder.next_frame()? {
                return Ok(Some(frame));
            }
            let read = self.inner.read_buf(self.decoder.buffer_mut()).await?;
            if read == 0 {
                if self.decoder.buffered() == 0 {
                    return Ok(None);
                }
                return Err(ConcordError::TransportError(format!(
                    "stream closed with {} bytes of a partial frame",
                    self.decoder.buffered()
                )));
            }
        }
    }
}

/// Frame and write one message
pub async fn write_message<W>(writer: &mut W, message: &WireMessage) -> ConcordResult<()>
where
    W: AsyncWrite + Unpin,
{
    let frame = encode_frame(message)?;
    writer.write_all(&frame).await?;
    Ok(())
}

struct Shared {
    config: TransportConfig,
    /// Writer queues of the live links
    peers: Mutex<HashMap<PeerId, mpsc::UnboundedSender<Bytes>>>,
    events: mpsc::Sender<TransportEvent>,
}

/// TCP transport
///
/// Every neighbor pair shares one connection, opened by the higher peer.
/// Lost links are redialed until the transport is dropped.
pub struct TcpTransport {
    shared: Arc<Shared>,
    local_addr: SocketAddr,
    shutdown: watch::Sender<bool>,
}

impl TcpTransport {
    /// Bind the configured listen address and start linking
    pub async fn start(config: TransportConfig) -> ConcordResult<(Self, EventReceiver)> {
        let listener = TcpListener::bind(config.local.socket_addr())
            .await
            .map_err(|e| ConcordError::TransportError(format!("bind {}: {}", config.local, e)))?;
        Self::start_with(listener, config)
    }

    /// Start on an already bound listener
    pub fn start_with(
        listener: TcpListener,
        config: TransportConfig,
    ) -> ConcordResult<(Self, EventReceiver)> {
        let local_addr = listener.local_addr()?;
        let (events, receiver) = mpsc::channel(config.event_buffer);
        let (shutdown, shutdown_rx) = watch::channel(false);

        let dialed: Vec<PeerId> = config
            .neighbors
            .iter()
            .copied()
            .filter(|&peer| config.dials(peer))
            .collect();

        let shared = Arc::new(Shared {
            config,
            peers: Mutex::new(HashMap::new()),
            events,
        });

        info!(
            local = %shared.config.local,
            addr = %local_addr,
            neighbors = shared.config.neighbors.len(),
            key = %shared.config.identity.fingerprint(),
            "transport listening"
        );

        tokio::spawn(accept_loop(listener, Arc::clone(&shared), shutdown_rx.clone()));
        for peer in dialed {
            tokio::spawn(dial_loop(Arc::clone(&shared), peer, shutdown_rx.clone()));
        }

        Ok((
            TcpTransport {
                shared,
                local_addr,
                shutdown,
            },
            receiver,
        ))
    }

    pub fn local(&self) -> PeerId {
        self.shared.config.local
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Queue a message on the link to `to`; false if there is no such link
    pub fn send(&self, to: PeerId, message: &WireMessage) -> bool {
        let frame = match encode_frame(message) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(to = %to, kind = message.kind(), error = %e, "cannot frame message");
                return false;
            }
        };
        match self.shared.peers.lock().get(&to) {
            Some(link) => link.send(frame).is_ok(),
            None => false,
        }
    }

    /// Neighbors with a live link, sorted
    pub fn connected(&self) -> Vec<PeerId> {
        let mut peers: Vec<PeerId> = self.shared.peers.lock().keys().copied().collect();
        peers.sort();
        peers
    }

    /// Close every link and stop dialing
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn accept_loop(listener: TcpListener, shared: Arc<Shared>, mut shutdown: watch::Receiver<bool>) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => return,
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    debug!(addr = %addr, "inbound connection");
                    let shared = Arc::clone(&shared);
                    let shutdown = shutdown.clone();
                    tokio::spawn(async move {
                        if let Err(e) = run_connection(shared, stream, None, shutdown).await {
                            warn!(addr = %addr, error = %e, "inbound link failed");
                        }
                    });
                }
                Err(e) => warn!(error = %e, "accept error"),
            },
        }
    }
}

async fn dial_loop(shared: Arc<Shared>, peer: PeerId, mut shutdown: watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow() {
            return;
        }
        let linked = shared.peers.lock().contains_key(&peer);
        if !linked {
            match TcpStream::connect(peer.socket_addr()).await {
                Ok(stream) => {
                    if let Err(e) =
                        run_connection(Arc::clone(&shared), stream, Some(peer), shutdown.clone()).await
                    {
                        warn!(peer = %peer, error = %e, "outbound link failed");
                    }
                }
                Err(e) => debug!(peer = %peer, error = %e, "dial failed"),
            }
        }

        tokio::select! {
            _ = shutdown.changed() => return,
            _ = sleep(shared.config.redial_interval) => {}
        }
    }
}

async fn run_connection(
    shared: Arc<Shared>,
    stream: TcpStream,
    expected: Option<PeerId>,
    mut shutdown: watch::Receiver<bool>,
) -> ConcordResult<()> {
    stream.set_nodelay(true)?;
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = FramedReader::new(read_half);

    let authed = timeout(
        shared.config.handshake_timeout,
        handshake(&shared.config, expected, &mut reader, &mut write_half),
    )
    .await
    .map_err(|_| ConcordError::HandshakeFailed {
        peer: expected.map_or_else(|| "unknown".to_string(), |p| p.to_string()),
        reason: "timed out".to_string(),
    })??;
    let peer = authed.peer;

    if expected.is_none() && shared.config.dials(peer) {
        return Err(ConcordError::HandshakeFailed {
            peer: peer.to_string(),
            reason: "lower peer must not dial".to_string(),
        });
    }

    let (link, mut queue) = mpsc::unbounded_channel::<Bytes>();
    {
        let mut peers = shared.peers.lock();
        if peers.contains_key(&peer) {
            return Err(ConcordError::HandshakeFailed {
                peer: peer.to_string(),
                reason: "already linked".to_string(),
            });
        }
        peers.insert(peer, link.clone());
    }

    info!(peer = %peer, key = %authed.key.fingerprint(), "neighbor up");
    let _ = shared
        .events
        .send(TransportEvent::NeighborUp(NeighborUp {
            peer,
            public_key: Some(authed.key.to_bytes()),
        }))
        .await;

    let writer = tokio::spawn(async move {
        while let Some(frame) = queue.recv().await {
            if let Err(e) = write_half.write_all(&frame).await {
                debug!(peer = %peer, error = %e, "write failed");
                break;
            }
        }
    });

    let result = loop {
        tokio::select! {
            _ = shutdown.changed() => break Ok(()),
            frame = reader.next_frame() => match frame {
                Ok(Some(frame)) => match WireMessage::decode(frame) {
                    Ok(message) => {
                        let event = TransportEvent::Message { from: peer, message };
                        if shared.events.send(event).await.is_err() {
                            break Ok(());
                        }
                    }
                    Err(e) => warn!(peer = %peer, error = %e, "dropping undecodable message"),
                },
                Ok(None) => break Ok(()),
                Err(e) => break Err(e),
            },
        }
    };

    writer.abort();
    {
        let mut peers = shared.peers.lock();
        if peers.get(&peer).is_some_and(|current| current.same_channel(&link)) {
            peers.remove(&peer);
        }
    }
    info!(peer = %peer, "neighbor down");
    let _ = shared
        .events
        .send(TransportEvent::NeighborDown(NeighborDown { peer }))
        .await;

    result
}
