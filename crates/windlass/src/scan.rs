//! Discovering position token ids from transfer logs.
//!
//! Public endpoints cap `eth_getLogs` ranges unpredictably, so the scan
//! walks backward from the snapshot block in adaptive chunks: a failed
//! range query halves the chunk and retries the same window, down to a
//! floor below which the endpoint is declared unusable. Ids seen in
//! logs are verified against current `ownerOf` before they count, since
//! a token may have been transferred onward or settled since the log
//! was emitted.

use crate::errors::WindlassError;
use crate::evm::NodeClient;
use alloy::primitives::{Address, U256};
use eyre::Context as _;
use std::collections::HashSet;
use std::future::Future;
use tokio::task::JoinSet;
use tracing::{debug, warn};

pub const INITIAL_CHUNK_BLOCKS: u64 = 250_000;
pub const MIN_CHUNK_BLOCKS: u64 = 2_000;

#[derive(Debug, Clone, Copy)]
pub struct ScanWindow {
    pub initial_chunk: u64,
    pub min_chunk: u64,
}

impl Default for ScanWindow {
    fn default() -> Self {
        Self {
            initial_chunk: INITIAL_CHUNK_BLOCKS,
            min_chunk: MIN_CHUNK_BLOCKS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanOutcome {
    /// Verified ids, highest first.
    pub token_ids: Vec<U256>,
    pub expected: u64,
    pub complete: bool,
    /// Present when the scan reached genesis short of the expected count.
    pub note: Option<String>,
}

pub trait TokenLogSource: Clone + Send + Sync + 'static {
    fn transfer_token_ids_to(
        &self,
        nft: Address,
        to: Address,
        from_block: u64,
        to_block: u64,
    ) -> impl Future<Output = eyre::Result<Vec<U256>>> + Send;

    fn owner_of(
        &self,
        nft: Address,
        token_id: U256,
    ) -> impl Future<Output = eyre::Result<Address>> + Send;
}

impl TokenLogSource for NodeClient {
    fn transfer_token_ids_to(
        &self,
        nft: Address,
        to: Address,
        from_block: u64,
        to_block: u64,
    ) -> impl Future<Output = eyre::Result<Vec<U256>>> + Send {
        self.transfer_log_token_ids(nft, to, from_block, to_block)
    }

    fn owner_of(
        &self,
        nft: Address,
        token_id: U256,
    ) -> impl Future<Output = eyre::Result<Address>> + Send {
        self.position_owner(nft, token_id)
    }
}

/// Walk transfer logs backward from `latest_block` until `expected`
/// currently-owned ids are confirmed or genesis is reached. The result
/// set is invariant under chunk sizing; only the query count changes.
pub async fn scan_owned_token_ids<S: TokenLogSource>(
    source: &S,
    nft: Address,
    owner: Address,
    expected: u64,
    latest_block: u64,
    window: &ScanWindow,
) -> eyre::Result<ScanOutcome> {
    if window.min_chunk == 0 || window.initial_chunk < window.min_chunk {
        eyre::bail!(
            "invalid scan window: initial_chunk={} min_chunk={}",
            window.initial_chunk,
            window.min_chunk
        );
    }
    if expected == 0 {
        return Ok(ScanOutcome {
            token_ids: vec![],
            expected,
            complete: true,
            note: None,
        });
    }

    let mut chunk = window.initial_chunk;
    let mut to_block = latest_block;
    let mut checked: HashSet<U256> = HashSet::new();
    let mut owned: Vec<U256> = vec![];

    loop {
        let from_block = if to_block >= chunk - 1 {
            to_block - (chunk - 1)
        } else {
            0
        };

        let ids = match source
            .transfer_token_ids_to(nft, owner, from_block, to_block)
            .await
        {
            Ok(ids) => ids,
            Err(err) => {
                if chunk > window.min_chunk {
                    let next = (chunk / 2).max(window.min_chunk);
                    warn!(%err, from_block, to_block, chunk, next, "log query failed; halving block range");
                    chunk = next;
                    continue;
                }
                warn!(%err, from_block, to_block, chunk, "log query failed at minimum block range");
                return Err(WindlassError::ScanFailed.into());
            }
        };

        let mut lookups: JoinSet<(U256, Option<Address>)> = JoinSet::new();
        for id in ids {
            if !checked.insert(id) {
                continue;
            }
            let src = source.clone();
            lookups.spawn(async move {
                // A revert here means the token was burned or the id is
                // stale; it simply does not count toward the owner.
                let current = src.owner_of(nft, id).await.ok();
                (id, current)
            });
        }
        while let Some(joined) = lookups.join_next().await {
            let (id, current) = joined.context("owner lookup task")?;
            if current == Some(owner) {
                owned.push(id);
            }
        }

        if u64::try_from(owned.len()).unwrap_or(u64::MAX) >= expected {
            break;
        }
        if from_block == 0 {
            break;
        }
        to_block = from_block - 1;
    }

    owned.sort_unstable_by(|a, b| b.cmp(a));
    let found = u64::try_from(owned.len()).unwrap_or(u64::MAX);
    let complete = found >= expected;
    let note = if complete {
        None
    } else {
        Some(format!(
            "Found {found}/{expected} position ids. The RPC endpoint may be limiting historical log queries."
        ))
    };
    debug!(found, expected, complete, "position id scan finished");
    Ok(ScanOutcome {
        token_ids: owned,
        expected,
        complete,
        note,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn addr(byte: u8) -> Address {
        Address::repeat_byte(byte)
    }

    fn id(n: u64) -> U256 {
        U256::from(n)
    }

    struct FakeChainInner {
        /// (block number, token id) transfer-in events for the scanned owner.
        transfers: Vec<(u64, U256)>,
        owners: HashMap<U256, Address>,
        /// Ranges wider than this many blocks fail, mimicking endpoint caps.
        max_range: Option<u64>,
        log_queries: AtomicU32,
        owner_lookups: AtomicU32,
    }

    #[derive(Clone)]
    struct FakeChain(Arc<FakeChainInner>);

    impl FakeChain {
        fn new(transfers: Vec<(u64, U256)>, owners: Vec<(U256, Address)>) -> Self {
            Self(Arc::new(FakeChainInner {
                transfers,
                owners: owners.into_iter().collect(),
                max_range: None,
                log_queries: AtomicU32::new(0),
                owner_lookups: AtomicU32::new(0),
            }))
        }

        fn with_max_range(mut self, max_range: u64) -> Self {
            if let Some(inner) = Arc::get_mut(&mut self.0) {
                inner.max_range = Some(max_range);
            }
            self
        }

        fn log_queries(&self) -> u32 {
            self.0.log_queries.load(Ordering::SeqCst)
        }

        fn owner_lookups(&self) -> u32 {
            self.0.owner_lookups.load(Ordering::SeqCst)
        }
    }

    impl TokenLogSource for FakeChain {
        fn transfer_token_ids_to(
            &self,
            _nft: Address,
            _to: Address,
            from_block: u64,
            to_block: u64,
        ) -> impl Future<Output = eyre::Result<Vec<U256>>> + Send {
            self.0.log_queries.fetch_add(1, Ordering::SeqCst);
            let width = to_block - from_block + 1;
            let over_cap = self.0.max_range.is_some_and(|cap| width > cap);
            let ids: Vec<U256> = self
                .0
                .transfers
                .iter()
                .filter(|(block, _)| *block >= from_block && *block <= to_block)
                .map(|(_, token)| *token)
                .collect();
            async move {
                if over_cap {
                    eyre::bail!("query returned more than 10000 results");
                }
                Ok(ids)
            }
        }

        fn owner_of(
            &self,
            _nft: Address,
            token_id: U256,
        ) -> impl Future<Output = eyre::Result<Address>> + Send {
            self.0.owner_lookups.fetch_add(1, Ordering::SeqCst);
            let current = self.0.owners.get(&token_id).copied();
            async move { current.ok_or_else(|| eyre::eyre!("execution reverted")) }
        }
    }

    #[tokio::test]
    async fn keeps_only_ids_still_owned_and_sorts_descending() -> eyre::Result<()> {
        let me = addr(0xAA);
        let someone_else = addr(0xBB);
        let chain = FakeChain::new(
            vec![(10, id(5)), (50, id(7)), (90, id(9))],
            vec![(id(5), me), (id(7), someone_else), (id(9), me)],
        );

        let outcome =
            scan_owned_token_ids(&chain, addr(1), me, 2, 100, &ScanWindow::default()).await?;
        assert_eq!(outcome.token_ids, vec![id(9), id(5)]);
        assert!(outcome.complete);
        assert_eq!(outcome.note, None);
        assert_eq!(chain.log_queries(), 1, "one wide chunk should suffice");
        Ok(())
    }

    #[tokio::test]
    async fn chunk_size_never_changes_the_result_set() -> eyre::Result<()> {
        let me = addr(0xAA);
        let transfers = vec![(3, id(2)), (40, id(4)), (77, id(6)), (99, id(8))];
        let owners = vec![(id(2), me), (id(4), me), (id(6), me), (id(8), me)];

        let wide = FakeChain::new(transfers.clone(), owners.clone());
        let narrow = FakeChain::new(transfers, owners);

        let a = scan_owned_token_ids(
            &wide,
            addr(1),
            me,
            4,
            100,
            &ScanWindow {
                initial_chunk: 1_000,
                min_chunk: 2,
            },
        )
        .await?;
        let b = scan_owned_token_ids(
            &narrow,
            addr(1),
            me,
            4,
            100,
            &ScanWindow {
                initial_chunk: 7,
                min_chunk: 2,
            },
        )
        .await?;

        assert_eq!(a.token_ids, b.token_ids);
        assert_eq!(a.token_ids, vec![id(8), id(6), id(4), id(2)]);
        assert!(narrow.log_queries() > wide.log_queries());
        Ok(())
    }

    #[tokio::test]
    async fn halves_the_range_and_retries_the_same_window() -> eyre::Result<()> {
        let me = addr(0xAA);
        let chain = FakeChain::new(vec![(95, id(3))], vec![(id(3), me)]).with_max_range(10);

        let outcome = scan_owned_token_ids(
            &chain,
            addr(1),
            me,
            1,
            99,
            &ScanWindow {
                initial_chunk: 32,
                min_chunk: 2,
            },
        )
        .await?;
        assert_eq!(outcome.token_ids, vec![id(3)]);
        assert!(outcome.complete);
        // 32 and 16 fail, 8 succeeds.
        assert!(chain.log_queries() >= 3);
        Ok(())
    }

    #[tokio::test]
    async fn fails_terminally_below_the_chunk_floor() -> eyre::Result<()> {
        let me = addr(0xAA);
        let chain = FakeChain::new(vec![(5, id(1))], vec![(id(1), me)]).with_max_range(0);

        let err = match scan_owned_token_ids(
            &chain,
            addr(1),
            me,
            1,
            50,
            &ScanWindow {
                initial_chunk: 8,
                min_chunk: 2,
            },
        )
        .await
        {
            Ok(_) => eyre::bail!("scan should fail when every range errors"),
            Err(e) => e,
        };
        match err.downcast_ref::<WindlassError>() {
            Some(WindlassError::ScanFailed) => Ok(()),
            other => eyre::bail!("unexpected error kind: {other:?}"),
        }
    }

    #[tokio::test]
    async fn reaching_genesis_short_reports_the_shortfall() -> eyre::Result<()> {
        let me = addr(0xAA);
        let chain = FakeChain::new(vec![(20, id(4)), (60, id(6))], vec![(id(4), me), (id(6), me)]);

        let outcome =
            scan_owned_token_ids(&chain, addr(1), me, 3, 100, &ScanWindow::default()).await?;
        assert_eq!(outcome.token_ids, vec![id(6), id(4)]);
        assert!(!outcome.complete);
        let note = outcome.note.ok_or_else(|| eyre::eyre!("missing note"))?;
        assert!(note.contains("2/3"), "note was: {note}");
        Ok(())
    }

    #[tokio::test]
    async fn repeated_transfers_of_one_id_are_verified_once() -> eyre::Result<()> {
        let me = addr(0xAA);
        let chain = FakeChain::new(
            vec![(10, id(5)), (30, id(5)), (70, id(5))],
            vec![(id(5), me)],
        );

        let outcome =
            scan_owned_token_ids(&chain, addr(1), me, 1, 100, &ScanWindow::default()).await?;
        assert_eq!(outcome.token_ids, vec![id(5)]);
        assert_eq!(chain.owner_lookups(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn zero_expected_skips_the_scan_entirely() -> eyre::Result<()> {
        let me = addr(0xAA);
        let chain = FakeChain::new(vec![(10, id(5))], vec![(id(5), me)]);

        let outcome =
            scan_owned_token_ids(&chain, addr(1), me, 0, 100, &ScanWindow::default()).await?;
        assert!(outcome.token_ids.is_empty());
        assert!(outcome.complete);
        assert_eq!(chain.log_queries(), 0);
        Ok(())
    }
}
