//! Notification Sink port and its implementations.
//!
//! Publishing is fire-and-forget: the engine calls the sink only after the
//! unit of work that produced the events has committed, and a failing sink
//! never fails the operation.

use std::sync::{Mutex, PoisonError};
use std::sync::atomic::{AtomicBool, Ordering};

use loadmatch_types::NotificationEvent;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("notification channel closed")]
    Closed,
    #[error("notification transport failed: {0}")]
    Transport(String),
}

/// Outbound notification port.
pub trait NotificationSink: Send + Sync {
    fn publish(&self, event: &NotificationEvent) -> Result<(), SinkError>;
}

/// Publish every event, logging and swallowing failures.
pub fn publish_all(sink: &dyn NotificationSink, events: &[NotificationEvent]) {
    for event in events {
        if let Err(err) = sink.publish(event) {
            tracing::warn!(
                kind = %event.kind,
                shipment = %event.shipment_id,
                target = %event.target_user_id,
                error = %err,
                "Notification dropped"
            );
        }
    }
}

/// Hands events to a tokio task over an unbounded channel. Never blocks.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<NotificationEvent>,
}

impl ChannelSink {
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<NotificationEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl NotificationSink for ChannelSink {
    fn publish(&self, event: &NotificationEvent) -> Result<(), SinkError> {
        self.tx.send(event.clone()).map_err(|_| SinkError::Closed)
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<NotificationEvent>>,
    failing: AtomicBool,
}

impl RecordingSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// While set, every publish fails with a transport error.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    #[must_use]
    pub fn events(&self) -> Vec<NotificationEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Drain recorded events.
    pub fn take(&self) -> Vec<NotificationEvent> {
        std::mem::take(&mut *self.events.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl NotificationSink for RecordingSink {
    fn publish(&self, event: &NotificationEvent) -> Result<(), SinkError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(SinkError::Transport("recording sink set to fail".into()));
        }
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
        Ok(())
    }
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl NotificationSink for NullSink {
    fn publish(&self, _event: &NotificationEvent) -> Result<(), SinkError> {
        Ok(())
    }
}
