//! Async service: drives a [`Node`] from the TCP transport

use std::collections::BTreeSet;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

use concord_broadcast::BroadcastStats;
use concord_core::{AddTag, ConcordResult, PeerId};
use concord_crdt::{ReplicaStats, Reply, Request};
use concord_transport::{EventReceiver, TcpTransport, TransportConfig, TransportEvent};

use crate::config::NodeSettings;
use crate::node::{Node, RuntimeStats};

/// Final state of a service run
#[derive(Clone, Debug)]
pub struct ServiceReport {
    pub local: PeerId,
    pub elements: BTreeSet<String>,
    pub digest: String,
    pub runtime: RuntimeStats,
    pub broadcast: BroadcastStats,
    pub replica: ReplicaStats,
}

impl ServiceReport {
    fn collect(node: &Node) -> Self {
        ServiceReport {
            local: node.local(),
            elements: node.replica().state().elements(),
            digest: node.replica().digest(),
            runtime: node.stats().clone(),
            broadcast: node.broadcast_stats().clone(),
            replica: node.replica_stats().clone(),
        }
    }

    pub fn log(&self) {
        let b = &self.broadcast;
        let r = &self.replica;
        info!(
            local = %self.local,
            broadcasts = b.broadcasts,
            delivered = b.delivered,
            relayed = b.relayed,
            buffered = b.buffered,
            dropped_duplicate = b.dropped_duplicate,
            dropped_invalid = b.dropped_invalid,
            dropped_equivocation = b.dropped_equivocation,
            "broadcast stats"
        );
        info!(
            local = %self.local,
            adds = r.adds,
            removes = r.removes,
            noop_removes = r.noop_removes,
            applied = r.applied,
            decode_failures = r.decode_failures,
            elements = self.elements.len(),
            digest = %self.digest,
            "replica stats"
        );
    }
}

/// Read-only look at replica internals, answered out of band
#[derive(Debug)]
pub enum Inspect {
    Tags {
        element: String,
        reply: oneshot::Sender<BTreeSet<AddTag>>,
    },
    Digest {
        reply: oneshot::Sender<String>,
    },
    /// Neighbors currently linked
    Neighbors {
        reply: oneshot::Sender<Vec<PeerId>>,
    },
}

/// Channels an application uses to talk to a running service
pub struct ServiceHandle {
    /// Dropping this sender stops the service
    pub requests: mpsc::Sender<Request>,
    pub replies: mpsc::Receiver<Reply>,
    pub inspect: mpsc::Sender<Inspect>,
}

impl ServiceHandle {
    /// Live add tags of `element`; `None` once the service has stopped
    pub async fn tags(&self, element: &str) -> Option<BTreeSet<AddTag>> {
        let (reply, rx) = oneshot::channel();
        let query = Inspect::Tags {
            element: element.to_string(),
            reply,
        };
        self.inspect.send(query).await.ok()?;
        rx.await.ok()
    }

    pub async fn digest(&self) -> Option<String> {
        let (reply, rx) = oneshot::channel();
        self.inspect.send(Inspect::Digest { reply }).await.ok()?;
        rx.await.ok()
    }

    pub async fn neighbors(&self) -> Option<Vec<PeerId>> {
        let (reply, rx) = oneshot::channel();
        self.inspect.send(Inspect::Neighbors { reply }).await.ok()?;
        rx.await.ok()
    }
}

/// A node wired to its transport
pub struct Service {
    node: Node,
    transport: TcpTransport,
    events: EventReceiver,
    stall_timeout: Duration,
}

impl Service {
    /// Bind the listener, then build the node
    pub async fn start(settings: &NodeSettings) -> ConcordResult<Self> {
        let mut transport_config =
            TransportConfig::new(settings.local, settings.neighbors.clone(), settings.identity.clone());
        transport_config.trusted_keys = settings.trusted_keys.clone();

        let (transport, events) = TcpTransport::start(transport_config).await?;
        Ok(Service {
            node: Node::from_settings(settings),
            transport,
            events,
            stall_timeout: settings.stall_timeout,
        })
    }

    pub fn local(&self) -> PeerId {
        self.node.local()
    }

    /// Run until the request channel closes or the transport stops
    pub async fn run(
        mut self,
        mut requests: mpsc::Receiver<Request>,
        replies: mpsc::Sender<Reply>,
        mut inspect: mpsc::Receiver<Inspect>,
    ) -> ServiceReport {
        let mut stall_check = interval(self.stall_timeout);
        stall_check.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                event = self.events.recv() => match event {
                    Some(event) => self.on_transport_event(event),
                    None => break,
                },
                request = requests.recv() => match request {
                    Some(request) => self.node.request(request),
                    None => break,
                },
                Some(query) = inspect.recv() => {
                    self.answer(query);
                    continue;
                }
                _ = stall_check.tick() => {
                    self.node.log_stalled(self.stall_timeout);
                }
            }

            self.node.tick();
            self.flush(&replies).await;
        }

        info!(local = %self.node.local(), "service stopping");
        self.transport.shutdown();
        let report = ServiceReport::collect(&self.node);
        report.log();
        report
    }

    /// Spawn [`Service::run`] and return its channels
    pub fn spawn(self, buffer: usize) -> (ServiceHandle, tokio::task::JoinHandle<ServiceReport>) {
        let (request_tx, request_rx) = mpsc::channel(buffer);
        let (reply_tx, reply_rx) = mpsc::channel(buffer);
        let (inspect_tx, inspect_rx) = mpsc::channel(buffer);
        let task = tokio::spawn(self.run(request_rx, reply_tx, inspect_rx));
        (
            ServiceHandle {
                requests: request_tx,
                replies: reply_rx,
                inspect: inspect_tx,
            },
            task,
        )
    }

    fn on_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::NeighborUp(up) => self.node.on_neighbor_up(up),
            TransportEvent::NeighborDown(down) => self.node.on_neighbor_down(down),
            TransportEvent::Message { from, message } => self.node.queue_incoming(from, message),
        }
    }

    fn answer(&self, query: Inspect) {
        // A dropped receiver just means the caller stopped waiting
        match query {
            Inspect::Tags { element, reply } => {
                let _ = reply.send(self.node.replica().observed(&element));
            }
            Inspect::Digest { reply } => {
                let _ = reply.send(self.node.replica().digest());
            }
            Inspect::Neighbors { reply } => {
                let _ = reply.send(self.node.neighbors());
            }
        }
    }

    async fn flush(&mut self, replies: &mpsc::Sender<Reply>) {
        while let Some(out) = self.node.pop_outgoing() {
            if !self.transport.send(out.to, &out.message) {
                debug!(to = %out.to, kind = out.message.kind(), "no link, message dropped");
            }
        }
        while let Some(reply) = self.node.pop_reply() {
            if replies.send(reply).await.is_err() {
                debug!("reply receiver gone");
            }
        }
    }
}
