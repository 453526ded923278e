// rust/stream-core/src/dataset/prefetch.rs

//! One-ahead shard prefetching.
//!
//! While the consumer reads shard `i`, a single background thread copies
//! shard `i + 1` into the cache session. The result comes back through a
//! one-slot channel, so at most one fetch is ever outstanding and at most
//! two shards are resident on disk.
//!
//! An abandoned fetch (stream dropped, or a different shard requested) is
//! never joined. Its thread finishes, fails to hand off because the receiver
//! is gone, and drops the fetched [`LocalShard`], which removes the file.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver};

use crate::cache::{CacheSession, LocalShard};
use crate::catalog::ShardId;
use crate::config::PrefetchConfig;
use crate::error::{Result, StreamError};
use crate::source::ShardSource;

type FetchResult = Result<LocalShard>;

/// Counters describing how shards were obtained.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PrefetchStats {
    /// Shards handed over by a successful background fetch.
    pub hits: u64,
    /// Shards fetched synchronously because nothing was in flight for them.
    pub misses: u64,
    /// Background fetches that came back without content.
    pub unavailable: u64,
    /// Synchronous retries after a failed attempt.
    pub retries: u64,
    /// Time the consumer spent blocked on a background fetch.
    pub wait_time: Duration,
}

/// The single outstanding background fetch.
struct InFlight {
    index: usize,
    receiver: Receiver<FetchResult>,
}

/// Outcome of waiting on a background fetch.
enum Prefetched {
    Ready(LocalShard),
    /// The fetch ran but produced no content.
    Unavailable(StreamError),
}

/// Hands out shard content in catalog order, keeping the next shard's fetch
/// running in the background.
pub struct Prefetcher {
    source: Arc<dyn ShardSource>,
    dataset: Arc<str>,
    shards: Arc<[ShardId]>,
    session: Arc<CacheSession>,
    enabled: bool,
    max_attempts: u32,
    in_flight: Option<InFlight>,
    stats: PrefetchStats,
}

impl Prefetcher {
    pub fn new(
        source: Arc<dyn ShardSource>,
        dataset: Arc<str>,
        shards: Arc<[ShardId]>,
        session: Arc<CacheSession>,
        config: &PrefetchConfig,
    ) -> Self {
        Self {
            source,
            dataset,
            shards,
            session,
            enabled: config.enabled,
            max_attempts: config.max_fetch_attempts.max(1),
            in_flight: None,
            stats: PrefetchStats::default(),
        }
    }

    /// Obtains the content of shard `index`.
    ///
    /// Waits for the background fetch if one is running for this shard,
    /// otherwise fetches synchronously. Failed attempts are retried
    /// synchronously until `max_fetch_attempts` is used up; a failed
    /// prefetch counts as the first attempt. Before returning, whatever the
    /// outcome, the fetch of shard `index + 1` is started.
    ///
    /// # Errors
    ///
    /// Returns the last fetch error once every attempt has failed.
    pub fn obtain(&mut self, index: usize) -> Result<LocalShard> {
        let shard = self
            .shards
            .get(index)
            .cloned()
            .ok_or_else(|| StreamError::fetch(format!("#{index}"), "shard index out of range"))?;

        let mut result = match self.take_prefetched(index) {
            Some(Prefetched::Ready(local)) => {
                self.stats.hits += 1;
                Ok(local)
            }
            Some(Prefetched::Unavailable(e)) => {
                self.stats.unavailable += 1;
                tracing::warn!(shard = %shard, error = %e, "prefetch unavailable, fetching synchronously");
                Err(e)
            }
            None => {
                self.stats.misses += 1;
                self.fetch_now(&shard)
            }
        };

        let mut attempts = 1;
        while let Err(e) = &result {
            if attempts >= self.max_attempts {
                break;
            }
            tracing::warn!(shard = %shard, attempt = attempts, error = %e, "retrying shard fetch");
            attempts += 1;
            self.stats.retries += 1;
            result = self.fetch_now(&shard);
        }

        self.launch(index + 1);
        result
    }

    /// Drops any background fetch without waiting for it.
    pub fn cancel(&mut self) {
        if let Some(in_flight) = self.in_flight.take() {
            tracing::debug!(index = in_flight.index, "abandoning in-flight prefetch");
        }
    }

    pub fn stats(&self) -> PrefetchStats {
        self.stats
    }

    pub fn is_prefetching_enabled(&self) -> bool {
        self.enabled
    }

    /// Index of the shard currently being fetched in the background.
    pub fn in_flight(&self) -> Option<usize> {
        self.in_flight.as_ref().map(|f| f.index)
    }

    fn fetch_now(&self, shard: &ShardId) -> Result<LocalShard> {
        self.source.fetch_content(&self.dataset, shard, &self.session)
    }

    fn take_prefetched(&mut self, index: usize) -> Option<Prefetched> {
        let in_flight = self.in_flight.take()?;
        if in_flight.index != index {
            // Stale fetch for some other shard: let it clean up after itself.
            tracing::debug!(wanted = index, in_flight = in_flight.index, "discarding prefetch");
            return None;
        }

        let started = Instant::now();
        let received = in_flight.receiver.recv();
        self.stats.wait_time += started.elapsed();

        Some(match received {
            Ok(Ok(local)) => Prefetched::Ready(local),
            Ok(Err(e)) => Prefetched::Unavailable(e),
            Err(_) => Prefetched::Unavailable(StreamError::fetch(
                self.shards[index].as_str(),
                "prefetch thread exited without a result",
            )),
        })
    }

    fn launch(&mut self, index: usize) {
        if !self.enabled {
            return;
        }
        let Some(shard) = self.shards.get(index).cloned() else {
            return;
        };

        let (sender, receiver) = channel::bounded::<FetchResult>(1);
        let source = Arc::clone(&self.source);
        let dataset = Arc::clone(&self.dataset);
        let session = Arc::clone(&self.session);

        let spawned = thread::Builder::new()
            .name(format!("shard-prefetch-{index}"))
            .spawn(move || {
                let result = source.fetch_content(&dataset, &shard, &session);
                if let Err(e) = &result {
                    tracing::debug!(shard = %shard, error = %e, "background fetch failed");
                }
                // A closed channel means nobody wants this shard any more;
                // dropping the result deletes whatever was fetched.
                if sender.send(result).is_err() {
                    tracing::debug!(shard = %shard, "prefetched shard discarded");
                }
            });

        match spawned {
            Ok(_) => {
                tracing::trace!(index, "launched prefetch");
                self.in_flight = Some(InFlight { index, receiver });
            }
            Err(e) => {
                tracing::warn!(index, error = %e, "failed to spawn prefetch thread");
            }
        }
    }
}

impl Drop for Prefetcher {
    fn drop(&mut self) {
        self.cancel();
    }
}
