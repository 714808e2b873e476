//! HTTP transport for cluster messages
//!
//! Every local mutation is POSTed as JSON to `{peer}/cluster` on each
//! configured peer. Each peer has its own queue drained by a single task, so
//! a peer sees messages in the order they were broadcast. Delivery is
//! fire-and-forget: failures are logged and the peer catches up from the next
//! snapshot it reads.

use file_cache::{ClusterMessage, ClusterSink};
use reqwest::Client;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

const PEER_TIMEOUT: Duration = Duration::from_secs(5);
/// Messages buffered per peer before new ones are dropped
const PEER_QUEUE_SIZE: usize = 1024;

struct PeerQueue {
    url: String,
    tx: mpsc::Sender<ClusterMessage>,
}

pub struct HttpPeerSink {
    queues: Vec<PeerQueue>,
}

impl HttpPeerSink {
    /// Start one delivery task per peer. Must be called inside the runtime;
    /// the tasks exit once the sink is dropped and their queues are drained.
    pub fn new(peers: Vec<String>) -> Self {
        let client = Client::builder()
            .timeout(PEER_TIMEOUT)
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "Failed to build peer client, using defaults");
                Client::new()
            });

        let queues = peers
            .into_iter()
            .map(|peer| {
                let url = format!("{}/cluster", peer);
                let (tx, rx) = mpsc::channel(PEER_QUEUE_SIZE);
                tokio::spawn(deliver(client.clone(), url.clone(), rx));
                PeerQueue { url, tx }
            })
            .collect();

        Self { queues }
    }
}

impl ClusterSink for HttpPeerSink {
    fn broadcast(&self, message: ClusterMessage) {
        for queue in &self.queues {
            if let Err(e) = queue.tx.try_send(message.clone()) {
                warn!(url = %queue.url, error = %e, "Dropping cluster message for peer");
            }
        }
    }
}

async fn deliver(client: Client, url: String, mut rx: mpsc::Receiver<ClusterMessage>) {
    while let Some(message) = rx.recv().await {
        match client.post(&url).json(&message).send().await {
            Ok(response) if response.status().is_success() => {
                debug!(url = %url, "Delivered cluster message");
            }
            Ok(response) => {
                warn!(url = %url, status = %response.status(), "Peer rejected cluster message");
            }
            Err(e) => {
                warn!(url = %url, error = %e, "Failed to reach peer");
            }
        }
    }
    debug!(url = %url, "Peer queue closed");
}
