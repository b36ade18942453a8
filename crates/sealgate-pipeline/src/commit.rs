//! Deferred persistence
//!
//! Upload and update hand the object put and the metadata commit to a
//! detached task on a shared [`TaskTracker`]. The task is not tied to the
//! caller: dropping the [`CommitHandle`] does not cancel it. Shutdown calls
//! [`CommitTracker::drain`] so in-flight commits finish first.
//!
//! Commits for the same file run one at a time, in the order they were
//! accepted, whether detached or inline. Each commit waits for the one
//! accepted before it, so the last accepted update is the one whose object
//! version and metadata row end up current.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use sealgate_core::{GatewayError, GatewayResult};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;
use uuid::Uuid;

/// Outcome of the persistence step of an upload or update
#[derive(Debug)]
pub enum CommitHandle {
    /// Ciphertext and metadata were persisted before the call returned.
    Committed,
    /// Persistence runs in the background.
    Pending(JoinHandle<GatewayResult<()>>),
}

impl CommitHandle {
    pub fn is_pending(&self) -> bool {
        matches!(self, CommitHandle::Pending(_))
    }

    /// Wait for the commit to finish and return its result.
    pub async fn wait(self) -> GatewayResult<()> {
        match self {
            CommitHandle::Committed => Ok(()),
            CommitHandle::Pending(handle) => handle
                .await
                .map_err(|e| GatewayError::Other(anyhow::anyhow!("commit task failed: {e}")))?,
        }
    }
}

/// Tail of the per-file commit chain: the newest accepted commit's
/// sequence number and the signal its successor waits on.
struct Tail {
    seq: u64,
    done: oneshot::Receiver<()>,
}

#[derive(Default)]
struct Chains {
    next_seq: u64,
    tails: HashMap<Uuid, Tail>,
}

#[derive(Clone)]
pub struct CommitTracker {
    tracker: TaskTracker,
    timeout: Duration,
    chains: Arc<Mutex<Chains>>,
}

impl CommitTracker {
    pub fn new(timeout: Duration) -> Self {
        Self {
            tracker: TaskTracker::new(),
            timeout,
            chains: Arc::new(Mutex::new(Chains::default())),
        }
    }

    /// Run `commit` detached, bounded by the commit timeout, after every
    /// commit for `file_uid` accepted before it.
    pub fn spawn<F>(&self, file_uid: Uuid, commit: F) -> CommitHandle
    where
        F: Future<Output = GatewayResult<()>> + Send + 'static,
    {
        CommitHandle::Pending(self.tracker.spawn(self.ordered(file_uid, commit)))
    }

    /// Run `commit` on the caller's task, with the same ordering and timeout
    /// as [`spawn`](Self::spawn).
    pub async fn run_inline<F>(&self, file_uid: Uuid, commit: F) -> GatewayResult<()>
    where
        F: Future<Output = GatewayResult<()>> + Send + 'static,
    {
        self.ordered(file_uid, commit).await
    }

    /// Join the chain for `file_uid` now, at acceptance time, and return a
    /// future that waits for its predecessor before running `commit`.
    fn ordered<F>(
        &self,
        file_uid: Uuid,
        commit: F,
    ) -> impl Future<Output = GatewayResult<()>> + Send + 'static
    where
        F: Future<Output = GatewayResult<()>> + Send + 'static,
    {
        let (done_tx, done_rx) = oneshot::channel();
        let (seq, previous) = {
            let mut chains = self.chains.lock();
            chains.next_seq += 1;
            let seq = chains.next_seq;
            let previous = chains.tails.insert(
                file_uid,
                Tail {
                    seq,
                    done: done_rx,
                },
            );
            (seq, previous)
        };

        let chains = self.chains.clone();
        let timeout = self.timeout;
        async move {
            if let Some(previous) = previous {
                // Err means the predecessor finished (or was dropped); either way it is done
                let _ = previous.done.await;
            }
            let result = match tokio::time::timeout(timeout, commit).await {
                Ok(result) => result,
                Err(_) => Err(GatewayError::Storage(format!(
                    "commit timed out after {}s",
                    timeout.as_secs()
                ))),
            };

            let mut chains = chains.lock();
            if chains.tails.get(&file_uid).is_some_and(|tail| tail.seq == seq) {
                chains.tails.remove(&file_uid);
            }
            drop(chains);
            drop(done_tx);
            result
        }
    }

    /// Files with a commit chain still open
    pub fn files_in_flight(&self) -> usize {
        self.chains.lock().tails.len()
    }

    /// Commits started but not yet finished
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Wait for every in-flight commit. The tracker stays usable afterwards.
    pub async fn drain(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pending_commit_reports_result() {
        let tracker = CommitTracker::new(Duration::from_secs(5));
        let ok = tracker.spawn(Uuid::new_v4(), async { Ok(()) });
        assert!(ok.is_pending());
        ok.wait().await.unwrap();

        let failed = tracker.spawn(Uuid::new_v4(), async {
            Err(GatewayError::Storage("put failed".into()))
        });
        assert!(matches!(failed.wait().await, Err(GatewayError::Storage(_))));
    }

    #[tokio::test]
    async fn test_commit_timeout() {
        let tracker = CommitTracker::new(Duration::from_millis(20));
        let slow = tracker.spawn(Uuid::new_v4(), async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(())
        });
        let err = slow.wait().await.unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn test_drain_waits_for_detached_commits() {
        let tracker = CommitTracker::new(Duration::from_secs(5));
        let (tx, rx) = tokio::sync::oneshot::channel();
        // Handle dropped on purpose: the task keeps running
        drop(tracker.spawn(Uuid::new_v4(), async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let _ = tx.send(());
            Ok(())
        }));
        tracker.drain().await;
        assert!(rx.await.is_ok());
        assert_eq!(tracker.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_same_file_commits_run_in_acceptance_order() {
        let tracker = CommitTracker::new(Duration::from_secs(5));
        let file_uid = Uuid::new_v4();
        let log = Arc::new(Mutex::new(Vec::new()));

        let first_log = log.clone();
        let first = tracker.spawn(file_uid, async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            first_log.lock().push("first");
            Ok(())
        });
        let second_log = log.clone();
        let second = tracker.spawn(file_uid, async move {
            second_log.lock().push("second");
            Ok(())
        });
        let third_log = log.clone();
        tracker
            .run_inline(file_uid, async move {
                third_log.lock().push("third");
                Ok(())
            })
            .await
            .unwrap();

        first.wait().await.unwrap();
        second.wait().await.unwrap();
        assert_eq!(*log.lock(), vec!["first", "second", "third"]);
        assert_eq!(tracker.files_in_flight(), 0);
    }

    #[tokio::test]
    async fn test_failed_commit_releases_successor() {
        let tracker = CommitTracker::new(Duration::from_secs(5));
        let file_uid = Uuid::new_v4();
        let failed = tracker.spawn(file_uid, async {
            Err(GatewayError::Storage("put failed".into()))
        });
        let next = tracker.spawn(file_uid, async { Ok(()) });
        assert!(failed.wait().await.is_err());
        next.wait().await.unwrap();
    }

    #[tokio::test]
    async fn test_other_files_do_not_wait() {
        let tracker = CommitTracker::new(Duration::from_secs(5));
        let (release_tx, release_rx) = oneshot::channel::<()>();
        let blocked = tracker.spawn(Uuid::new_v4(), async move {
            let _ = release_rx.await;
            Ok(())
        });
        tokio::time::timeout(
            Duration::from_secs(1),
            tracker.run_inline(Uuid::new_v4(), async { Ok(()) }),
        )
        .await
        .expect("unrelated file must not queue behind another")
        .unwrap();
        let _ = release_tx.send(());
        blocked.wait().await.unwrap();
    }

    #[tokio::test]
    async fn test_committed_is_ready() {
        assert!(!CommitHandle::Committed.is_pending());
        CommitHandle::Committed.wait().await.unwrap();
    }
}
