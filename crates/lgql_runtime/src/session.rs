//! Execution sessions.
//!
//! A [`Session`] owns everything the asynchronous units of one execution
//! share: the task tracker joining them, the cancellation signal and the
//! patch sink. The caller gets a [`Completion`] to wait on.
//!
//! Units are spawned either by the executor before it returns the initial
//! response or by another unit while that unit is still running, so the
//! tracker never becomes empty while work remains.

use crate::response::{display_path, Patch};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, trace, warn, Instrument, Span};

/// Where patches are delivered. Bounded, so slow consumers apply backpressure.
pub type PatchSink = mpsc::Sender<Patch>;

/// Receiving end of a [`PatchSink`].
pub type PatchStream = mpsc::Receiver<Patch>;

/// Creates a patch sink with the given capacity.
pub fn patch_channel(buffer: usize) -> (PatchSink, PatchStream) {
    mpsc::channel(buffer.max(1))
}

/// Kind of an asynchronous unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitKind {
    /// A deferred field.
    Defer,
    /// Pulls the elements of a streamed list.
    Stream,
    /// One element of a streamed list.
    StreamItem,
    /// Follows the emissions of a live field.
    Live,
}

impl fmt::Display for UnitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Defer => "defer",
            Self::Stream => "stream",
            Self::StreamItem => "stream item",
            Self::Live => "live",
        })
    }
}

/// Error from waiting on a session.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoordinationError {
    /// Units were still running when the session timeout elapsed.
    #[error("session did not complete within {0:?}, {1} unit(s) still running")]
    Timeout(Duration, usize),
}

/// Session statistics.
#[derive(Debug, Default)]
pub struct SessionStats {
    /// Units spawned.
    pub spawned: AtomicUsize,

    /// Units finished.
    pub finished: AtomicUsize,

    /// Patches handed to the sink.
    pub patches_sent: AtomicUsize,
}

impl SessionStats {
    /// Takes a snapshot of the counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            spawned: self.spawned.load(Ordering::Relaxed),
            finished: self.finished.load(Ordering::Relaxed),
            patches_sent: self.patches_sent.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time copy of [`SessionStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct StatsSnapshot {
    pub spawned: usize,
    pub finished: usize,
    pub patches_sent: usize,
}

impl StatsSnapshot {
    /// Units spawned but not finished.
    pub fn running(&self) -> usize {
        self.spawned.saturating_sub(self.finished)
    }
}

/// Shared state of one execution.
pub struct Session {
    tracker: TaskTracker,

    /// Cooperative stop: live and stream units stop producing.
    cancellation: CancellationToken,

    /// Hard stop after a session timeout: every unit is dropped.
    abort: CancellationToken,

    sink: Option<PatchSink>,

    stats: Arc<SessionStats>,
}

impl Session {
    /// Creates a session.
    pub fn new(cancellation: CancellationToken, sink: Option<PatchSink>) -> Self {
        Self {
            tracker: TaskTracker::new(),
            cancellation,
            abort: CancellationToken::new(),
            sink,
            stats: Arc::new(SessionStats::default()),
        }
    }

    /// Returns true if patches can be delivered.
    pub fn has_sink(&self) -> bool {
        self.sink.is_some()
    }

    /// Returns the cancellation signal.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Returns true once the session was cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Returns the statistics.
    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    /// Spawns a unit.
    ///
    /// The unit runs in `span` and is dropped if the session is aborted.
    pub fn spawn<F>(&self, kind: UnitKind, span: Span, unit: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let guard = UnitGuard::new(kind, Arc::clone(&self.stats));
        let abort = self.abort.clone();
        trace!(%kind, "spawning unit");

        self.tracker.spawn(
            async move {
                let _guard = guard;
                tokio::select! {
                    biased;
                    _ = abort.cancelled() => debug!(%kind, "unit aborted"),
                    _ = unit => {}
                }
            }
            .instrument(span),
        );
    }

    /// Delivers a patch.
    ///
    /// Returns false if there is no sink or the receiver went away; the latter
    /// cancels the session.
    pub async fn send(&self, patch: Patch) -> bool {
        let Some(sink) = &self.sink else {
            return false;
        };

        let path = display_path(&patch.path);
        let sent = tokio::select! {
            biased;
            _ = self.abort.cancelled() => false,
            result = sink.send(patch) => result.is_ok(),
        };

        if sent {
            self.stats.patches_sent.fetch_add(1, Ordering::Relaxed);
            trace!(path = %path, "patch sent");
        } else if !self.abort.is_cancelled() {
            warn!(path = %path, "patch receiver dropped, cancelling session");
            self.cancellation.cancel();
        }
        sent
    }

    /// Returns the join handle of this session.
    pub fn completion(&self, timeout: Option<Duration>) -> Completion {
        Completion {
            tracker: self.tracker.clone(),
            cancellation: self.cancellation.clone(),
            abort: self.abort.clone(),
            stats: Arc::clone(&self.stats),
            timeout,
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("units", &self.tracker.len())
            .field("cancelled", &self.cancellation.is_cancelled())
            .field("has_sink", &self.sink.is_some())
            .finish()
    }
}

/// Marks a unit as finished when dropped, whether the unit returned,
/// panicked or was aborted.
struct UnitGuard {
    kind: UnitKind,
    stats: Arc<SessionStats>,
}

impl UnitGuard {
    fn new(kind: UnitKind, stats: Arc<SessionStats>) -> Self {
        stats.spawned.fetch_add(1, Ordering::Relaxed);
        Self { kind, stats }
    }
}

impl Drop for UnitGuard {
    fn drop(&mut self) {
        self.stats.finished.fetch_add(1, Ordering::Relaxed);
        trace!(kind = %self.kind, "unit finished");
    }
}

/// Join handle over every unit of a session.
#[derive(Debug, Clone)]
pub struct Completion {
    tracker: TaskTracker,
    cancellation: CancellationToken,
    abort: CancellationToken,
    stats: Arc<SessionStats>,
    timeout: Option<Duration>,
}

impl Completion {
    /// Waits until every unit, nested ones included, has finished.
    ///
    /// With a session timeout, units still running when it elapses are
    /// cancelled and dropped, and [`CoordinationError::Timeout`] is returned.
    pub async fn wait(&self) -> Result<StatsSnapshot, CoordinationError> {
        self.tracker.close();

        let Some(timeout) = self.timeout else {
            self.tracker.wait().await;
            return Ok(self.stats());
        };

        if tokio::time::timeout(timeout, self.tracker.wait())
            .await
            .is_ok()
        {
            return Ok(self.stats());
        }

        let running = self.tracker.len();
        warn!(?timeout, running, "session timed out, aborting units");
        self.cancellation.cancel();
        self.abort.cancel();
        self.tracker.wait().await;
        Err(CoordinationError::Timeout(timeout, running))
    }

    /// Cancels the session.
    pub fn cancel(&self) {
        debug!("session cancelled");
        self.cancellation.cancel();
    }

    /// Returns true if no unit is running.
    pub fn is_finished(&self) -> bool {
        self.tracker.is_empty()
    }

    /// Returns the current statistics.
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::{PathSegment, ResultNode};

    fn patch(index: usize) -> Patch {
        Patch::assemble(
            vec![PathSegment::from("items"), PathSegment::from(index)],
            ResultNode::from(serde_json::json!(index)),
            Vec::new(),
            None,
        )
    }

    #[tokio::test]
    async fn test_wait_joins_nested_units() {
        let (sink, mut stream) = patch_channel(8);
        let session = Arc::new(Session::new(CancellationToken::new(), Some(sink)));
        let completion = session.completion(None);

        let outer = Arc::clone(&session);
        session.spawn(UnitKind::Defer, Span::none(), async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let inner = Arc::clone(&outer);
            outer.spawn(UnitKind::Defer, Span::none(), async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                inner.send(patch(1)).await;
            });
            outer.send(patch(0)).await;
        });
        drop(session);

        let stats = completion.wait().await.unwrap();
        assert_eq!(stats.spawned, 2);
        assert_eq!(stats.finished, 2);
        assert_eq!(stats.patches_sent, 2);
        assert!(completion.is_finished());

        let mut received = Vec::new();
        while let Some(patch) = stream.recv().await {
            received.push(display_path(&patch.path));
        }
        assert_eq!(received, vec!["items/0", "items/1"]);
    }

    #[tokio::test]
    async fn test_dropped_receiver_cancels() {
        let (sink, stream) = patch_channel(1);
        let session = Session::new(CancellationToken::new(), Some(sink));
        drop(stream);

        assert!(!session.send(patch(0)).await);
        assert!(session.is_cancelled());
        assert_eq!(session.stats().snapshot().patches_sent, 0);
    }

    #[tokio::test]
    async fn test_send_without_sink() {
        let session = Session::new(CancellationToken::new(), None);
        assert!(!session.has_sink());
        assert!(!session.send(patch(0)).await);
        assert!(!session.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_aborts_units() {
        let session = Session::new(CancellationToken::new(), None);
        session.spawn(UnitKind::Live, Span::none(), std::future::pending());
        let completion = session.completion(Some(Duration::from_secs(5)));

        let result = completion.wait().await;
        assert_eq!(
            result,
            Err(CoordinationError::Timeout(Duration::from_secs(5), 1))
        );
        assert!(session.is_cancelled());
        assert!(completion.is_finished());
        assert_eq!(completion.stats().running(), 0);
    }

    #[tokio::test]
    async fn test_cancel_is_observed_by_units() {
        let session = Session::new(CancellationToken::new(), None);
        let token = session.cancellation().clone();
        session.spawn(UnitKind::Stream, Span::none(), async move {
            token.cancelled().await;
        });

        let completion = session.completion(None);
        assert!(!completion.is_finished());
        completion.cancel();
        completion.wait().await.unwrap();
    }
}
