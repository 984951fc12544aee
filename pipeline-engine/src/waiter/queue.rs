// Notify Transport
// At-least-once queue carrying notify messages from executors to the
// wait/notify engine, with consumer-side dedupe by message id

use super::engine::WaitNotifyEngine;
use super::models::{NotifyOutcome, ResponseData};
use crate::error::EngineResult;
use crate::execution::models::new_id;

use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

/// One message on the notify transport
#[derive(Debug, Clone, PartialEq)]
pub struct NotifyMessage {
    pub message_id: String,
    pub correlation_id: String,
    pub data: ResponseData,
}

/// Create a connected publisher/consumer pair
pub fn notify_channel(dedupe_window: usize) -> (NotifyPublisher, NotifyConsumer) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        NotifyPublisher { tx },
        NotifyConsumer {
            rx,
            seen: DedupeWindow::new(dedupe_window),
        },
    )
}

/// Producer side of the transport
#[derive(Debug, Clone)]
pub struct NotifyPublisher {
    tx: mpsc::UnboundedSender<NotifyMessage>,
}

impl NotifyPublisher {
    /// Publish a response; returns the message id
    pub fn publish(&self, correlation_id: impl Into<String>, data: ResponseData) -> String {
        let message = NotifyMessage {
            message_id: new_id(),
            correlation_id: correlation_id.into(),
            data,
        };
        let id = message.message_id.clone();
        self.redeliver(message);
        id
    }

    /// Send an already published message again
    pub fn redeliver(&self, message: NotifyMessage) {
        if self.tx.send(message).is_err() {
            warn!("notify consumer is gone; message dropped");
        }
    }
}

/// Consumer side of the transport
pub struct NotifyConsumer {
    rx: mpsc::UnboundedReceiver<NotifyMessage>,
    seen: DedupeWindow,
}

impl NotifyConsumer {
    /// Deliver one message unless its id was seen within the window
    pub async fn process(
        &mut self,
        waiter: &WaitNotifyEngine,
        message: NotifyMessage,
    ) -> EngineResult<Option<NotifyOutcome>> {
        if !self.seen.insert(&message.message_id) {
            debug!(message_id = %message.message_id, "dropping redelivered message");
            return Ok(None);
        }
        waiter
            .notify(&message.correlation_id, message.data)
            .await
            .map(Some)
    }

    /// Consume until shutdown is signalled or every publisher is dropped
    pub async fn run(mut self, waiter: Arc<WaitNotifyEngine>, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                message = self.rx.recv() => {
                    let Some(message) = message else { break };
                    let correlation_id = message.correlation_id.clone();
                    if let Err(e) = self.process(&waiter, message).await {
                        warn!(%correlation_id, error = %e, "notify delivery failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }
}

/// Bounded set of recently seen message ids
#[derive(Debug)]
pub struct DedupeWindow {
    capacity: usize,
    order: VecDeque<String>,
    seen: HashSet<String>,
}

impl DedupeWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            order: VecDeque::new(),
            seen: HashSet::new(),
        }
    }

    /// Returns false if `id` is already in the window
    pub fn insert(&mut self, id: &str) -> bool {
        if self.seen.contains(id) {
            return false;
        }
        if self.order.len() == self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        self.order.push_back(id.to_string());
        self.seen.insert(id.to_string());
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dedupe_window_evicts_oldest() {
        let mut window = DedupeWindow::new(2);
        assert!(window.insert("a"));
        assert!(!window.insert("a"));
        assert!(window.insert("b"));
        assert!(window.insert("c"));
        // "a" fell out of the window
        assert!(window.insert("a"));
        assert!(!window.insert("c"));
    }

    #[tokio::test]
    async fn test_publisher_assigns_message_ids() {
        let (publisher, mut consumer) = notify_channel(16);
        let first = publisher.publish("c1", ResponseData::Signal { payload: serde_json::json!(1) });
        let second = publisher.publish("c1", ResponseData::Signal { payload: serde_json::json!(1) });
        assert_ne!(first, second);

        let message = consumer.rx.recv().await.unwrap();
        assert_eq!(message.message_id, first);
        publisher.redeliver(message.clone());
        let _ = consumer.rx.recv().await.unwrap();
        assert_eq!(consumer.rx.recv().await.unwrap(), message);
    }
}
