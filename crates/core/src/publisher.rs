//! # Event Publisher
//!
//! Fire-and-forget delivery of run deltas. Sinks report failures as
//! [`PublishError`]; the [`Publisher`] fan-out logs and drops them so a
//! broken subscriber can never stall or abort a run.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, mpsc};

use crate::error::PublishError;
use crate::events::RunEvent;

/// Per-run buffer for live subscribers
const DEFAULT_BROADCAST_CAPACITY: usize = 256;

/// A sink for run events. Must not block.
pub trait EventPublisher: Send + Sync {
    fn publish(&self, event: &RunEvent) -> Result<(), PublishError>;
}

/// A live view of one run: the last delta plus everything after it
pub struct Subscription {
    pub latest: Option<RunEvent>,
    pub receiver: broadcast::Receiver<RunEvent>,
}

impl Subscription {
    /// A subscription that yields `latest` and then ends
    pub fn closed(latest: RunEvent) -> Self {
        let (tx, receiver) = broadcast::channel(1);
        drop(tx);
        Self {
            latest: Some(latest),
            receiver,
        }
    }
}

struct RunChannel {
    tx: broadcast::Sender<RunEvent>,
    latest: Option<RunEvent>,
}

/// In-process hub with one broadcast channel per run.
///
/// The channel is dropped after a terminal event, which ends every live
/// subscription once the final delta has been delivered.
pub struct BroadcastPublisher {
    capacity: usize,
    channels: Mutex<HashMap<String, RunChannel>>,
}

impl Default for BroadcastPublisher {
    fn default() -> Self {
        Self::new(DEFAULT_BROADCAST_CAPACITY)
    }
}

impl BroadcastPublisher {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            channels: Mutex::new(HashMap::new()),
        }
    }

    /// Subscribe to a run that has not finished yet.
    pub fn subscribe(&self, run_id: &str) -> Result<Subscription, PublishError> {
        let mut channels = self.channels.lock().map_err(|_| PublishError::Closed)?;
        let channel = channels
            .entry(run_id.to_string())
            .or_insert_with(|| RunChannel {
                tx: broadcast::channel(self.capacity).0,
                latest: None,
            });
        Ok(Subscription {
            latest: channel.latest.clone(),
            receiver: channel.tx.subscribe(),
        })
    }

    pub fn live_runs(&self) -> usize {
        self.channels.lock().map(|c| c.len()).unwrap_or(0)
    }
}

impl EventPublisher for BroadcastPublisher {
    fn publish(&self, event: &RunEvent) -> Result<(), PublishError> {
        let mut channels = self.channels.lock().map_err(|_| PublishError::Closed)?;
        if event.is_terminal() {
            if let Some(channel) = channels.remove(&event.run_id) {
                // No receivers is not a failure
                let _ = channel.tx.send(event.clone());
            }
            return Ok(());
        }
        let channel = channels
            .entry(event.run_id.clone())
            .or_insert_with(|| RunChannel {
                tx: broadcast::channel(self.capacity).0,
                latest: None,
            });
        channel.latest = Some(event.clone());
        let _ = channel.tx.send(event.clone());
        Ok(())
    }
}

/// Forwards events into an mpsc channel without waiting for capacity.
pub struct ChannelPublisher {
    tx: mpsc::Sender<RunEvent>,
}

impl ChannelPublisher {
    pub fn new(tx: mpsc::Sender<RunEvent>) -> Self {
        Self { tx }
    }
}

impl EventPublisher for ChannelPublisher {
    fn publish(&self, event: &RunEvent) -> Result<(), PublishError> {
        self.tx.try_send(event.clone()).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => PublishError::Full,
            mpsc::error::TrySendError::Closed(_) => PublishError::Closed,
        })
    }
}

/// Fan-out over every configured sink. Failures are logged, never returned.
#[derive(Clone, Default)]
pub struct Publisher {
    sinks: Vec<Arc<dyn EventPublisher>>,
}

impl Publisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sink(mut self, sink: Arc<dyn EventPublisher>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn publish(&self, event: &RunEvent) {
        for sink in &self.sinks {
            if let Err(e) = sink.publish(event) {
                tracing::warn!(
                    run_id = %event.run_id,
                    kind = event.kind.as_str(),
                    seq = event.seq,
                    "Dropped run event: {}",
                    e
                );
            }
        }
    }
}
