//! Worker lifecycle tracking.
//!
//! Every accepted connection runs in its own tokio task. The supervisor owns
//! the table of outstanding workers and collects their exit status, either
//! right after a spawn (non-blocking sweep) or when the accept loop is woken
//! by a completion. Completions queue inside the `JoinSet` until collected,
//! so a burst of exits is never lost and never blocks the accept loop.

use crate::error::SpawnError;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use tokio::task::{Id, JoinError, JoinSet};
use tracing::{debug, info, warn};

/// Why a worker stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// The client closed the connection between requests.
    Disconnected,
    /// A read or write failed mid-exchange.
    TransportError,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitReason::Disconnected => f.write_str("disconnected"),
            ExitReason::TransportError => f.write_str("transport error"),
        }
    }
}

/// Summary a worker reports when it finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerExit {
    pub reason: ExitReason,
    pub requests: u64,
    pub bytes_in: u64,
    pub bytes_out: u64,
}

/// Bookkeeping for one live worker.
#[derive(Debug, Clone)]
pub struct WorkerRecord {
    pub peer: SocketAddr,
    pub accepted_at: DateTime<Utc>,
}

/// Outcome of collecting one worker.
#[derive(Debug)]
pub enum Reaped {
    Exited(WorkerExit),
    Panicked,
    Cancelled,
}

/// Tracks spawned workers and reaps finished ones.
pub struct Supervisor {
    tasks: JoinSet<WorkerExit>,
    records: HashMap<Id, WorkerRecord>,
    max_workers: usize,
}

impl Supervisor {
    pub fn new(max_workers: usize) -> Self {
        Self {
            tasks: JoinSet::new(),
            records: HashMap::new(),
            max_workers,
        }
    }

    /// Start a worker for `peer`.
    ///
    /// Fails without running `worker` when `max_workers` are already live;
    /// dropping the future then drops the connection it owns.
    pub fn spawn<F>(&mut self, peer: SocketAddr, worker: F) -> Result<Id, SpawnError>
    where
        F: Future<Output = WorkerExit> + Send + 'static,
    {
        if self.records.len() >= self.max_workers {
            return Err(SpawnError::AtCapacity {
                limit: self.max_workers,
            });
        }

        let handle = self.tasks.spawn(worker);
        let id = handle.id();
        self.records.insert(
            id,
            WorkerRecord {
                peer,
                accepted_at: Utc::now(),
            },
        );
        debug!(worker = %id, peer = %peer, live = self.records.len(), "spawned worker");
        Ok(id)
    }

    /// Collect every worker that has already finished. Never waits.
    pub fn reap(&mut self) -> usize {
        let mut reaped = 0;
        while let Some(result) = self.tasks.try_join_next_with_id() {
            self.collect(result);
            reaped += 1;
        }
        reaped
    }

    /// Wait until at least one worker finishes, collect it, then sweep any
    /// others that finished meanwhile.
    ///
    /// Pends forever while no workers are live, so it can sit in a
    /// `select!` next to `accept`.
    pub async fn wait_for_exit(&mut self) -> usize {
        match self.tasks.join_next_with_id().await {
            Some(result) => {
                self.collect(result);
                1 + self.reap()
            }
            None => std::future::pending().await,
        }
    }

    /// Number of workers not yet reaped.
    pub fn live(&self) -> usize {
        self.records.len()
    }

    pub fn record(&self, id: Id) -> Option<&WorkerRecord> {
        self.records.get(&id)
    }

    fn collect(&mut self, result: Result<(Id, WorkerExit), JoinError>) -> Reaped {
        let (id, reaped) = match result {
            Ok((id, exit)) => (id, Reaped::Exited(exit)),
            Err(e) if e.is_panic() => (e.id(), Reaped::Panicked),
            Err(e) => (e.id(), Reaped::Cancelled),
        };

        let record = self.records.remove(&id);
        let peer = record
            .as_ref()
            .map(|r| r.peer.to_string())
            .unwrap_or_default();
        let lifetime_ms = record
            .as_ref()
            .map(|r| (Utc::now() - r.accepted_at).num_milliseconds())
            .unwrap_or_default();

        match &reaped {
            Reaped::Exited(exit) => info!(
                worker = %id,
                peer = %peer,
                reason = %exit.reason,
                requests = exit.requests,
                bytes_in = exit.bytes_in,
                bytes_out = exit.bytes_out,
                lifetime_ms,
                "worker exited"
            ),
            Reaped::Panicked => warn!(worker = %id, peer = %peer, lifetime_ms, "worker panicked"),
            Reaped::Cancelled => warn!(worker = %id, peer = %peer, lifetime_ms, "worker cancelled"),
        }

        reaped
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        if !self.records.is_empty() {
            debug!(live = self.records.len(), "supervisor dropped with live workers");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::oneshot;

    fn peer() -> SocketAddr {
        "127.0.0.1:4000".parse().unwrap()
    }

    fn exit() -> WorkerExit {
        WorkerExit {
            reason: ExitReason::Disconnected,
            requests: 1,
            bytes_in: 64,
            bytes_out: 64,
        }
    }

    async fn explode() -> WorkerExit {
        panic!("worker blew up")
    }

    #[tokio::test]
    async fn test_reap_is_non_blocking() {
        let mut supervisor = Supervisor::new(8);
        let (tx, rx) = oneshot::channel::<()>();

        let id = supervisor
            .spawn(peer(), async move {
                let _ = rx.await;
                exit()
            })
            .unwrap();
        assert_eq!(supervisor.record(id).unwrap().peer, peer());

        // Still running: nothing to collect, and we do not wait for it.
        assert_eq!(supervisor.reap(), 0);
        assert_eq!(supervisor.live(), 1);

        tx.send(()).unwrap();
        let reaped = supervisor.wait_for_exit().await;
        assert_eq!(reaped, 1);
        assert_eq!(supervisor.live(), 0);
        assert!(supervisor.record(id).is_none());
    }

    #[tokio::test]
    async fn test_burst_of_exits_all_collected() {
        let mut supervisor = Supervisor::new(64);
        for _ in 0..32 {
            supervisor.spawn(peer(), async { exit() }).unwrap();
        }

        let mut total = 0;
        while total < 32 {
            total += supervisor.wait_for_exit().await;
        }
        assert_eq!(total, 32);
        assert_eq!(supervisor.live(), 0);
        assert_eq!(supervisor.reap(), 0);
    }

    #[tokio::test]
    async fn test_capacity_limit() {
        let mut supervisor = Supervisor::new(1);
        let (_tx, rx) = oneshot::channel::<()>();
        supervisor
            .spawn(peer(), async move {
                let _ = rx.await;
                exit()
            })
            .unwrap();

        let err = supervisor.spawn(peer(), async { exit() }).unwrap_err();
        assert_eq!(err, SpawnError::AtCapacity { limit: 1 });
        assert_eq!(supervisor.live(), 1);
    }

    #[tokio::test]
    async fn test_panicking_worker_is_reaped() {
        let mut supervisor = Supervisor::new(4);
        supervisor.spawn(peer(), explode()).unwrap();

        assert_eq!(supervisor.wait_for_exit().await, 1);
        assert_eq!(supervisor.live(), 0);
    }

    #[tokio::test]
    async fn test_wait_for_exit_pends_when_idle() {
        let mut supervisor = Supervisor::new(4);
        let waited =
            tokio::time::timeout(Duration::from_millis(20), supervisor.wait_for_exit()).await;
        assert!(waited.is_err());
    }
}
