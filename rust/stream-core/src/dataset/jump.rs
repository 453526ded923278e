// rust/stream-core/src/dataset/jump.rs

//! Metadata fast-jump.
//!
//! Resuming at global offset `skip_to` by re-reading every earlier record
//! would mean downloading every earlier shard. Instead, shard row counts are
//! summed from metadata alone until the shard containing `skip_to` is found.

use crate::catalog::ShardId;
use crate::source::ShardSource;

/// Progress is logged once per this many shards scanned.
const PROGRESS_INTERVAL: usize = 100;

/// Where a resumed stream starts reading.
///
/// When the target was located,
/// `rows_before_start_shard <= skip_to < rows_before_start_shard + row_count(start)`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FastJump {
    pub start_shard_index: usize,
    pub rows_before_start_shard: u64,
}

impl FastJump {
    /// Start of the dataset. Also the result when `skip_to` lies beyond every
    /// counted row.
    pub const RESTART: FastJump = FastJump {
        start_shard_index: 0,
        rows_before_start_shard: 0,
    };
}

/// Finds the first shard whose row range contains `skip_to`.
///
/// Shards whose metadata cannot be read contribute no rows and the scan
/// continues. If the scan runs off the end, [`FastJump::RESTART`] is
/// returned and logged.
pub fn find_start_shard(
    source: &dyn ShardSource,
    dataset: &str,
    shards: &[ShardId],
    skip_to: u64,
) -> FastJump {
    tracing::info!(dataset, shards = shards.len(), skip_to, "scanning shard metadata for resume point");
    if source.metadata_reads_body() {
        tracing::warn!(
            dataset,
            "shard format has no footer, fast-jump downloads every shard before the resume point"
        );
    }

    let mut total: u64 = 0;
    for (index, shard) in shards.iter().enumerate() {
        let row_count = match source.fetch_metadata(dataset, shard) {
            Ok(meta) => meta.row_count,
            Err(e) => {
                tracing::warn!(shard = %shard, index, error = %e, "skipping shard in metadata scan");
                continue;
            }
        };

        // Footer row counts are untrusted. A saturated sum ends the scan here.
        let through = total.saturating_add(row_count);
        if through <= skip_to && through < u64::MAX {
            total = through;
            if index % PROGRESS_INTERVAL == 0 {
                tracing::info!(index, rows_skipped = total, "fast-jump progress");
            }
        } else {
            tracing::info!(
                shard = %shard,
                index,
                rows_before = total,
                "found resume shard"
            );
            return FastJump {
                start_shard_index: index,
                rows_before_start_shard: total,
            };
        }
    }

    tracing::warn!(
        dataset,
        skip_to,
        rows_counted = total,
        "resume offset lies beyond all counted rows, restarting from the first shard"
    );
    FastJump::RESTART
}
