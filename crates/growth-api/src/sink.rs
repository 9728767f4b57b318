//! Output side of a streaming session.
//!
//! A session writes [`StreamMessage`]s into a [`StreamSink`]. The
//! production sink is [`ChannelSink`], a bounded channel whose receiver
//! feeds the HTTP event-stream body. With a capacity of one, a slow
//! reader holds the session at its next write, so steps are never
//! computed faster than the client drains them.
//!
//! When the HTTP body is dropped (client gone) the receiver goes with
//! it, and the next write or [`StreamSink::closed`] reports it.
//!
//! A stalled reader is handled as a disconnect: its stream ends without
//! a `complete` or `error` message.

use std::time::Duration;

use async_trait::async_trait;
use growth_types::StreamMessage;
use tokio::sync::mpsc;

/// Why a sink stopped accepting messages.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SinkError {
    /// The consumer went away.
    #[error("client disconnected")]
    Disconnected,

    /// The consumer stopped reading for longer than the idle timeout.
    #[error("client stalled for {waited:?}")]
    Stalled {
        /// How long the write waited.
        waited: Duration,
    },
}

/// Destination for one session's messages.
#[async_trait]
pub trait StreamSink: Send + Sync {
    /// Hand a message to the transport, waiting for room if necessary.
    async fn send(&mut self, message: StreamMessage) -> Result<(), SinkError>;

    /// Resolves once the consumer has gone away.
    async fn closed(&self);

    /// Whether the consumer has already gone away.
    fn is_closed(&self) -> bool;
}

/// Bounded-channel sink with a per-write idle timeout.
#[derive(Debug)]
pub struct ChannelSink {
    tx: mpsc::Sender<StreamMessage>,
    idle_timeout: Duration,
}

impl ChannelSink {
    /// Create a sink and the receiver that drains it.
    ///
    /// A `capacity` of zero is raised to one.
    pub fn channel(
        capacity: usize,
        idle_timeout: Duration,
    ) -> (Self, mpsc::Receiver<StreamMessage>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx, idle_timeout }, rx)
    }
}

#[async_trait]
impl StreamSink for ChannelSink {
    async fn send(&mut self, message: StreamMessage) -> Result<(), SinkError> {
        match tokio::time::timeout(self.idle_timeout, self.tx.send(message)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_closed)) => Err(SinkError::Disconnected),
            Err(_elapsed) => Err(SinkError::Stalled {
                waited: self.idle_timeout,
            }),
        }
    }

    async fn closed(&self) {
        self.tx.closed().await;
    }

    fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn error_message() -> StreamMessage {
        StreamMessage::Error {
            message: String::from("boom"),
        }
    }

    #[tokio::test]
    async fn delivers_in_order() {
        let (mut sink, mut rx) = ChannelSink::channel(4, Duration::from_secs(1));
        sink.send(error_message()).await.unwrap();
        sink.send(error_message()).await.unwrap();
        assert_eq!(rx.recv().await.unwrap().kind(), "error");
        assert_eq!(rx.recv().await.unwrap().kind(), "error");
    }

    #[tokio::test]
    async fn dropped_receiver_is_a_disconnect() {
        let (mut sink, rx) = ChannelSink::channel(1, Duration::from_secs(1));
        assert!(!sink.is_closed());
        drop(rx);
        assert!(sink.is_closed());
        sink.closed().await;
        assert_eq!(sink.send(error_message()).await, Err(SinkError::Disconnected));
    }

    #[tokio::test(start_paused = true)]
    async fn full_channel_times_out_as_stalled() {
        let (mut sink, _rx) = ChannelSink::channel(1, Duration::from_secs(30));
        sink.send(error_message()).await.unwrap();
        let err = sink.send(error_message()).await.unwrap_err();
        assert_eq!(
            err,
            SinkError::Stalled {
                waited: Duration::from_secs(30)
            }
        );
    }

    #[tokio::test]
    async fn zero_capacity_is_raised() {
        let (mut sink, mut rx) = ChannelSink::channel(0, Duration::from_secs(1));
        sink.send(error_message()).await.unwrap();
        assert!(rx.recv().await.is_some());
    }
}
