//! Scatter-gather over shards.
//!
//! One round sends one request per target shard, runs them concurrently up
//! to a limit and joins once every shard has answered or the round deadline
//! has passed. Nothing is retried; a shard that did not answer in time is
//! reported as `Timeout` and the caller decides what that means.

use crate::locator::ShardLocation;
use crate::types::*;
use futures::stream::{self, StreamExt};
use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Result of one shard request within a round.
#[derive(Debug, Clone, PartialEq)]
pub enum ShardOutcome<T> {
    Response(T),
    Timeout,
    Unreachable,
    Rejected(String),
}

impl<T> ShardOutcome<T> {
    pub fn is_response(&self) -> bool {
        matches!(self, ShardOutcome::Response(_))
    }

    /// Split into the response or the failure it stands for.
    pub fn into_result(self) -> Result<T, ShardFailure> {
        match self {
            ShardOutcome::Response(value) => Ok(value),
            ShardOutcome::Timeout => Err(ShardFailure::Timeout),
            ShardOutcome::Unreachable => Err(ShardFailure::Unreachable),
            ShardOutcome::Rejected(reason) => Err(ShardFailure::Rejected(reason)),
        }
    }
}

impl<T> From<Result<T, ShardFailure>> for ShardOutcome<T> {
    fn from(result: Result<T, ShardFailure>) -> Self {
        match result {
            Ok(value) => ShardOutcome::Response(value),
            Err(ShardFailure::Timeout) => ShardOutcome::Timeout,
            Err(ShardFailure::Unreachable) => ShardOutcome::Unreachable,
            Err(ShardFailure::Rejected(reason)) => ShardOutcome::Rejected(reason),
        }
    }
}

/// Fans requests out to shards and collects one outcome per shard.
///
/// # Example
///
/// ```rust,ignore
/// let runner = ScatterGatherRunner::new(8, Duration::from_secs(5));
/// let outcomes = runner
///     .dispatch(targets, |shard, node| executor.execute_initial(node, request(shard)), runner.deadline())
///     .await;
/// ```
#[derive(Debug, Clone)]
pub struct ScatterGatherRunner {
    max_concurrency: usize,
    timeout: Duration,
}

impl ScatterGatherRunner {
    /// Create a runner.
    ///
    /// # Arguments
    ///
    /// * `max_concurrency` - Maximum requests in flight at once (at least 1)
    /// * `timeout` - Default length of a round, used by `deadline`
    pub fn new(max_concurrency: usize, timeout: Duration) -> Self {
        Self {
            max_concurrency: max_concurrency.max(1),
            timeout,
        }
    }

    pub fn from_config(config: &ScrollConfig) -> Self {
        Self::new(
            config.max_concurrent_shard_requests,
            config.shard_request_timeout(),
        )
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Deadline for a round starting now.
    pub fn deadline(&self) -> Instant {
        Instant::now() + self.timeout
    }

    /// Run one round.
    ///
    /// `call` is invoked once per reachable target. Targets located as
    /// `Unavailable` are reported `Unreachable` without a call. Requests
    /// still queued or running at `deadline` are reported `Timeout`.
    ///
    /// # Returns
    ///
    /// Exactly one outcome per target shard, keyed by shard.
    pub async fn dispatch<T, F, Fut>(
        &self,
        targets: Vec<(ShardId, ShardLocation)>,
        call: F,
        deadline: Instant,
    ) -> BTreeMap<ShardId, ShardOutcome<T>>
    where
        F: Fn(ShardId, NodeId) -> Fut,
        Fut: Future<Output = Result<T, ShardFailure>>,
    {
        let mut outcomes = BTreeMap::new();
        let mut reachable = Vec::with_capacity(targets.len());

        for (shard, location) in targets {
            match location {
                ShardLocation::Node(node) => reachable.push((shard, node)),
                ShardLocation::Unavailable => {
                    debug!("{} has no live node, skipping", shard);
                    outcomes.insert(shard, ShardOutcome::Unreachable);
                }
            }
        }

        let call = &call;
        let responses: Vec<(ShardId, ShardOutcome<T>)> =
            stream::iter(reachable.into_iter().map(|(shard, node)| async move {
                let outcome = match tokio::time::timeout_at(deadline, call(shard, node)).await {
                    Ok(result) => ShardOutcome::from(result),
                    Err(_) => ShardOutcome::Timeout,
                };
                (shard, outcome)
            }))
            .buffer_unordered(self.max_concurrency)
            .collect()
            .await;

        for (shard, outcome) in responses {
            if !outcome.is_response() {
                debug!("{} did not respond: {}", shard, outcome_label(&outcome));
            }
            outcomes.insert(shard, outcome);
        }

        outcomes
    }
}

fn outcome_label<T>(outcome: &ShardOutcome<T>) -> &str {
    match outcome {
        ShardOutcome::Response(_) => "response",
        ShardOutcome::Timeout => "timeout",
        ShardOutcome::Unreachable => "unreachable",
        ShardOutcome::Rejected(reason) => reason,
    }
}
