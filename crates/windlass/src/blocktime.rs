//! Locating the block at or before a past timestamp.
//!
//! Nodes index blocks by number, not by time, so a trailing window (for
//! example "price per share seven days ago") needs a search over headers.
//! Each header fetched counts as one probe; callers surface the probe
//! count so a misbehaving endpoint shows up in logs.

use crate::evm::{BlockRef, NodeClient};
use std::future::Future;

pub trait BlockTimeSource: Sync {
    fn block_at(&self, number: u64) -> impl Future<Output = eyre::Result<BlockRef>> + Send;
}

impl BlockTimeSource for NodeClient {
    fn block_at(&self, number: u64) -> impl Future<Output = eyre::Result<BlockRef>> + Send {
        self.block_ref(number)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Located {
    pub block: BlockRef,
    pub probes: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowStart {
    Found(Located),
    /// The chain itself is younger than the window. Detected from the
    /// latest header alone, before any probe is issued.
    InsufficientHistory,
}

/// Binary-search headers in `[0, latest.number]` for the highest block
/// whose timestamp is at or before `target_ts`. When several blocks
/// share the boundary timestamp the highest number wins. If even the
/// genesis block is later than the target, genesis is returned; callers
/// that need a live contract at the result check bytecode there.
pub async fn locate_at_or_before<S: BlockTimeSource>(
    source: &S,
    latest: BlockRef,
    target_ts: u64,
) -> eyre::Result<Located> {
    let mut probes: u32 = 0;
    let mut best: Option<BlockRef> = None;
    let mut genesis: Option<BlockRef> = None;

    let mut low: u64 = 0;
    let mut high: u64 = latest.number;
    while low <= high {
        let mid = low + (high - low) / 2;
        let block = source.block_at(mid).await?;
        probes = probes.saturating_add(1);
        if block.timestamp <= target_ts {
            best = Some(block);
            low = mid + 1;
        } else if mid == 0 {
            genesis = Some(block);
            break;
        } else {
            high = mid - 1;
        }
    }

    let block = match best.or(genesis) {
        Some(b) => b,
        None => source.block_at(0).await?,
    };
    Ok(Located { block, probes })
}

/// Locate the block at the start of a trailing window ending at `latest`.
pub async fn block_at_window_start<S: BlockTimeSource>(
    source: &S,
    latest: BlockRef,
    window_secs: u64,
) -> eyre::Result<WindowStart> {
    if latest.timestamp <= window_secs {
        return Ok(WindowStart::InsufficientHistory);
    }
    let target = latest.timestamp - window_secs;
    let located = locate_at_or_before(source, latest, target).await?;
    Ok(WindowStart::Found(located))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct ScriptedChain {
        timestamps: Vec<u64>,
        probes: AtomicU32,
    }

    impl ScriptedChain {
        fn new(timestamps: Vec<u64>) -> Self {
            Self {
                timestamps,
                probes: AtomicU32::new(0),
            }
        }

        fn latest(&self) -> eyre::Result<BlockRef> {
            let number = self.timestamps.len().checked_sub(1);
            let number = number.ok_or_else(|| eyre::eyre!("empty chain"))?;
            let timestamp = self
                .timestamps
                .last()
                .copied()
                .ok_or_else(|| eyre::eyre!("empty chain"))?;
            Ok(BlockRef {
                number: u64::try_from(number)?,
                timestamp,
            })
        }

        fn probe_count(&self) -> u32 {
            self.probes.load(Ordering::SeqCst)
        }
    }

    impl BlockTimeSource for ScriptedChain {
        fn block_at(&self, number: u64) -> impl Future<Output = eyre::Result<BlockRef>> + Send {
            self.probes.fetch_add(1, Ordering::SeqCst);
            let ts = usize::try_from(number)
                .ok()
                .and_then(|i| self.timestamps.get(i).copied());
            async move {
                let timestamp = ts.ok_or_else(|| eyre::eyre!("no block {number}"))?;
                Ok(BlockRef { number, timestamp })
            }
        }
    }

    fn linear_chain(blocks: u64, genesis_ts: u64, step: u64) -> ScriptedChain {
        let timestamps = (0..blocks).map(|n| genesis_ts + n * step).collect();
        ScriptedChain::new(timestamps)
    }

    #[tokio::test]
    async fn picks_block_at_or_before_target() -> eyre::Result<()> {
        // Block 100 at 395,195 and block 101 at 395,201; a target of
        // 395,200 must land on block 100.
        let chain = linear_chain(102, 394_595, 6);
        let latest = chain.latest()?;
        assert_eq!(latest.timestamp, 395_201);

        let located = locate_at_or_before(&chain, latest, 395_200).await?;
        assert_eq!(located.block.number, 100);
        assert_eq!(located.block.timestamp, 395_195);
        Ok(())
    }

    #[tokio::test]
    async fn equal_timestamps_resolve_to_highest_number() -> eyre::Result<()> {
        let chain = ScriptedChain::new(vec![10, 20, 20, 20, 30]);
        let latest = chain.latest()?;
        let located = locate_at_or_before(&chain, latest, 20).await?;
        assert_eq!(located.block.number, 3);
        Ok(())
    }

    #[tokio::test]
    async fn probe_count_stays_logarithmic() -> eyre::Result<()> {
        let chain = linear_chain(1_024, 1_000_000, 12);
        let latest = chain.latest()?;
        let located = locate_at_or_before(&chain, latest, 1_000_000 + 500 * 12).await?;
        assert_eq!(located.block.number, 500);
        assert!(located.probes <= 12, "probes {} too high", located.probes);
        assert_eq!(located.probes, chain.probe_count());
        Ok(())
    }

    #[tokio::test]
    async fn target_before_genesis_falls_back_to_genesis() -> eyre::Result<()> {
        let chain = linear_chain(64, 1_000, 6);
        let latest = chain.latest()?;
        let located = locate_at_or_before(&chain, latest, 5).await?;
        assert_eq!(located.block.number, 0);
        assert_eq!(located.block.timestamp, 1_000);
        Ok(())
    }

    #[tokio::test]
    async fn young_chain_reports_insufficient_history_without_probing() -> eyre::Result<()> {
        let chain = ScriptedChain::new(vec![100, 200, 500]);
        let latest = chain.latest()?;
        let start = block_at_window_start(&chain, latest, 604_800).await?;
        assert_eq!(start, WindowStart::InsufficientHistory);
        assert_eq!(chain.probe_count(), 0, "short-circuit must not probe");
        Ok(())
    }

    #[tokio::test]
    async fn window_start_locates_target_block() -> eyre::Result<()> {
        let chain = linear_chain(102, 394_595, 6);
        let latest = chain.latest()?;
        let start = block_at_window_start(&chain, latest, 1).await?;
        match start {
            WindowStart::Found(located) => assert_eq!(located.block.number, 100),
            WindowStart::InsufficientHistory => eyre::bail!("expected a located block"),
        }
        Ok(())
    }
}
