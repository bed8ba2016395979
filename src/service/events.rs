//! Live status fan-out.
//!
//! Every announcement is one line of text delivered to the observers
//! connected at that moment. Nothing is replayed to late subscribers and a
//! lagging observer loses lines instead of slowing the publisher down.

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio_stream::wrappers::BroadcastStream;
use tracing::{info, warn};

#[derive(Clone)]
pub struct EventBroadcaster {
    tx: broadcast::Sender<String>,
}

impl EventBroadcaster {
    /// `capacity` bounds how many lines a slow observer may fall behind.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Push a status line to all connected observers; returns how many were reached.
    pub fn announce(&self, message: impl Into<String>) -> usize {
        let line = single_line(message.into());
        info!(observers = self.tx.receiver_count(), "{line}");
        self.tx.send(line).unwrap_or(0)
    }

    pub fn subscribe(&self) -> Subscription {
        Subscription {
            rx: self.tx.subscribe(),
        }
    }

    pub fn observer_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// One observer's handle. Dropping it (or calling [`Subscription::close`])
/// removes the observer.
pub struct Subscription {
    rx: broadcast::Receiver<String>,
}

impl Subscription {
    /// Next line; `None` once the broadcaster is gone.
    pub async fn recv(&mut self) -> Option<String> {
        loop {
            match self.rx.recv().await {
                Ok(line) => return Some(line),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "event observer lagged; lines dropped");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Next line if one is already waiting.
    pub fn try_recv(&mut self) -> Option<String> {
        loop {
            match self.rx.try_recv() {
                Ok(line) => return Some(line),
                Err(TryRecvError::Lagged(_)) => continue,
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return None,
            }
        }
    }

    pub fn into_stream(self) -> BroadcastStream<String> {
        BroadcastStream::new(self.rx)
    }

    pub fn close(self) {
        drop(self.rx);
    }
}

fn single_line(message: String) -> String {
    if message.contains(['\n', '\r']) {
        message.replace(['\r', '\n'], " ")
    } else {
        message
    }
}
