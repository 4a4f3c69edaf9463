//! Live handles.
//!
//! A [`LiveHandle`] is what a `live` or `streamable` field resolver returns:
//! a lazy sequence of [`Emission`]s. Producers usually run as their own task
//! and push into a bounded channel through a [`LiveSender`]; the executor
//! pulls one emission at a time and drops the handle when it is done, which
//! closes the channel.

use crate::resolver::ResolverError;
use futures::stream::{self, BoxStream};
use futures::{FutureExt, Stream, StreamExt};
use serde_json::Value;
use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

/// One value produced by a live handle.
#[derive(Debug)]
pub struct Emission {
    pub outcome: Result<Value, ResolverError>,
    /// The producer will not emit anything after this one.
    pub last: bool,
}

impl Emission {
    /// A value, more may follow.
    pub fn value(value: Value) -> Self {
        Self {
            outcome: Ok(value),
            last: false,
        }
    }

    /// The final value.
    pub fn last(value: Value) -> Self {
        Self {
            outcome: Ok(value),
            last: true,
        }
    }

    /// A failed emission, more may follow.
    pub fn error(error: ResolverError) -> Self {
        Self {
            outcome: Err(error),
            last: false,
        }
    }
}

/// A cancellable source of emissions.
pub struct LiveHandle {
    inner: BoxStream<'static, Emission>,
}

impl LiveHandle {
    /// Wraps any stream of emissions.
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: Stream<Item = Emission> + Send + 'static,
    {
        Self {
            inner: stream.boxed(),
        }
    }

    /// Creates a handle backed by a bounded channel.
    pub fn channel(buffer: usize) -> (LiveSender, LiveHandle) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let handle = Self::from_stream(stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|emission| (emission, rx))
        }));
        (LiveSender { sender: tx }, handle)
    }

    /// A handle emitting a single final value.
    pub fn once(value: Value) -> Self {
        Self::from_stream(stream::iter([Emission::last(value)]))
    }

    /// A handle emitting each value in turn, then closing.
    pub fn from_values<I>(values: I) -> Self
    where
        I: IntoIterator<Item = Value>,
        I::IntoIter: Send + 'static,
    {
        Self::from_stream(stream::iter(values).map(Emission::value))
    }

    /// Waits for the next emission; `None` once the producer closed.
    pub async fn next(&mut self) -> Option<Emission> {
        self.inner.next().await
    }

    /// Polls once without waiting.
    ///
    /// `None` means nothing is ready yet, `Some(None)` that the handle is closed.
    pub fn next_now(&mut self) -> Option<Option<Emission>> {
        self.inner.next().now_or_never()
    }
}

impl Stream for LiveHandle {
    type Item = Emission;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Emission>> {
        self.inner.poll_next_unpin(cx)
    }
}

impl fmt::Debug for LiveHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveHandle").finish_non_exhaustive()
    }
}

/// Producer side of a channel-backed [`LiveHandle`].
#[derive(Debug, Clone)]
pub struct LiveSender {
    sender: mpsc::Sender<Emission>,
}

impl LiveSender {
    /// Sends a value, waiting for room in the channel.
    pub async fn send(&self, value: Value) -> Result<(), LiveClosed> {
        self.emit(Emission::value(value)).await
    }

    /// Sends the final value.
    pub async fn send_last(&self, value: Value) -> Result<(), LiveClosed> {
        self.emit(Emission::last(value)).await
    }

    /// Sends an error.
    pub async fn send_error(&self, error: ResolverError) -> Result<(), LiveClosed> {
        self.emit(Emission::error(error)).await
    }

    /// Sends a prepared emission.
    pub async fn emit(&self, emission: Emission) -> Result<(), LiveClosed> {
        self.sender.send(emission).await.map_err(|_| LiveClosed)
    }

    /// Completes once the consumer dropped the handle.
    pub async fn closed(&self) {
        self.sender.closed().await;
    }

    /// Returns true if the consumer dropped the handle.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// The consumer of a live handle went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("live handle closed")]
pub struct LiveClosed;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_channel_handle() {
        let (sender, mut handle) = LiveHandle::channel(4);

        sender.send(json!(1)).await.unwrap();
        sender.send_last(json!(2)).await.unwrap();
        drop(sender);

        let first = handle.next().await.unwrap();
        assert_eq!(first.outcome.unwrap(), json!(1));
        assert!(!first.last);

        let second = handle.next().await.unwrap();
        assert_eq!(second.outcome.unwrap(), json!(2));
        assert!(second.last);

        assert!(handle.next().await.is_none());
    }

    #[tokio::test]
    async fn test_dropping_handle_closes_sender() {
        let (sender, handle) = LiveHandle::channel(1);
        assert!(!sender.is_closed());

        drop(handle);
        sender.closed().await;
        assert_eq!(sender.send(json!(1)).await, Err(LiveClosed));
    }

    #[tokio::test]
    async fn test_next_now() {
        let (sender, mut handle) = LiveHandle::channel(1);
        assert!(handle.next_now().is_none());

        sender.send(json!("ready")).await.unwrap();
        let ready = handle.next_now().unwrap().unwrap();
        assert_eq!(ready.outcome.unwrap(), json!("ready"));

        drop(sender);
        assert!(matches!(handle.next_now(), Some(None)));
    }

    #[tokio::test]
    async fn test_from_values() {
        let handle = LiveHandle::from_values(vec![json!("a"), json!("b")]);
        let values: Vec<_> = handle
            .map(|emission| emission.outcome.unwrap())
            .collect()
            .await;
        assert_eq!(values, vec![json!("a"), json!("b")]);

        let mut once = LiveHandle::once(json!(7));
        assert!(once.next().await.unwrap().last);
        assert!(once.next().await.is_none());
    }
}
