//! Read passes against the chain.
//!
//! A pass pins one node connection and one observed block, then fans
//! out the reads a command needs. Independent reads run concurrently
//! and degrade per field; a field that cannot be read renders as
//! unavailable instead of zero. Each pass carries a generation token,
//! and results assembled under a superseded generation are discarded
//! rather than mixed into newer output.

use crate::config::WindlassConfig;
use crate::errors::require_configured;
use crate::evm::{BlockRef, EvmNode, NodeClient};
use crate::generation::{Generation, GenerationCounter};
use crate::gate::VenueConditions;
use crate::positions::{
    adapter_position_view, current_borrow_rate_bps, market_adapter_premium_bps,
    market_available_liquidity, market_position, market_position_nft, market_quote_debt,
    market_rate_model, market_total_principal_active, rate_model_base_rate_bps,
    AdapterPositionView, MarketPositionRecord, PositionSnapshot,
};
use crate::queue::{load_queue_state, QueueProvider, QueueState};
use crate::routes::{resolve_route, RouteKey, RouteSpec, Venue};
use crate::scan::{scan_owned_token_ids, ScanOutcome, ScanWindow};
use crate::tracked::TrackedIds;
use crate::vault::{self, BlendInputs, TrailingApr};
use crate::venues::{
    morpho_is_authorized, morpho_market_params, morpho_params_issue, morpho_position_view,
    resolve_aave_collateral_token, resolve_aave_reserve, MorphoMarketParams, VenuePosition,
};
use alloy::primitives::{Address, U256};
use eyre::Context as _;
use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use tokio::task::JoinSet;
use tracing::{debug, warn};

pub struct Resolver {
    node: EvmNode,
    generation: GenerationCounter,
}

/// One established connection plus the block all of its reads are
/// interpreted against.
pub struct Pass {
    pub node: NodeClient,
    pub latest: BlockRef,
    generation: Generation,
}

impl Resolver {
    pub fn new(cfg: &WindlassConfig) -> Self {
        Self {
            node: EvmNode::from_config(&cfg.rpc),
            generation: GenerationCounter::new(),
        }
    }

    /// Connect (with endpoint failover) and start a fresh pass. Any
    /// pass started earlier is superseded from this point on.
    pub async fn begin(&self) -> eyre::Result<Pass> {
        let (node, latest) = self.node.connect().await?;
        let generation = self.generation.advance();
        debug!(
            block = latest.number,
            ?generation,
            "resolver pass established"
        );
        Ok(Pass {
            node,
            latest,
            generation,
        })
    }

    pub fn is_current(&self, pass: &Pass) -> bool {
        self.generation.is_current(pass.generation)
    }

    fn ensure_current(&self, pass: &Pass) -> eyre::Result<()> {
        if self.is_current(pass) {
            Ok(())
        } else {
            eyre::bail!("pass superseded by a newer refresh; discarding its results")
        }
    }
}

/// Run a read whose failure only blanks a field.
async fn soft<T>(label: &'static str, fut: impl Future<Output = eyre::Result<T>>) -> Option<T> {
    match fut.await {
        Ok(v) => Some(v),
        Err(err) => {
            debug!(%err, label, "read unavailable");
            None
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MarketSummary {
    pub available_liquidity: Option<U256>,
    pub total_principal_active: Option<U256>,
    pub base_rate_bps: Option<U256>,
}

pub async fn load_market_summary(node: &NodeClient, market: Address) -> MarketSummary {
    let (available_liquidity, total_principal_active, rate_model) = tokio::join!(
        soft("availableLiquidity", market_available_liquidity(node, market)),
        soft(
            "totalPrincipalActive",
            market_total_principal_active(node, market)
        ),
        soft("rateModel", market_rate_model(node, market)),
    );
    let base_rate_bps = match rate_model {
        Some(model) => soft("baseRateBps", rate_model_base_rate_bps(node, model)).await,
        None => None,
    };
    MarketSummary {
        available_liquidity,
        total_principal_active,
        base_rate_bps,
    }
}

/// Which withdrawal queue the collateral unstakes through.
fn queue_provider_for(cfg: &WindlassConfig, collateral_asset: Address) -> Option<QueueProvider> {
    if Some(collateral_asset) == cfg.tokens.wsteth {
        Some(QueueProvider::Lido)
    } else if Some(collateral_asset) == cfg.tokens.weeth {
        Some(QueueProvider::EtherFi)
    } else {
        None
    }
}

/// The venue holding the proxy's collateral is identified by the
/// receiver recorded at open time.
async fn load_venue_position(
    node: &NodeClient,
    cfg: &WindlassConfig,
    record: Option<&MarketPositionRecord>,
    adapter_view: Option<&AdapterPositionView>,
) -> Option<VenuePosition> {
    let record = record?;
    let view = adapter_view?;
    if view.proxy.is_zero() {
        return None;
    }

    if Some(record.receiver) == cfg.contracts.aave_receiver {
        let reserve = resolve_aave_reserve(
            node,
            cfg.contracts.aave_pool,
            cfg.contracts.aave_data_provider,
            view.collateral_asset,
        )
        .await;
        return Some(crate::venues::aave_position_view(node, reserve, view.proxy).await);
    }

    if Some(record.receiver) == cfg.contracts.morpho_receiver {
        let core = cfg.contracts.morpho?;
        let id = if Some(view.collateral_asset) == cfg.tokens.wsteth {
            cfg.markets.morpho_wsteth_id
        } else if Some(view.collateral_asset) == cfg.tokens.weeth {
            cfg.markets.morpho_weeth_id
        } else {
            None
        }?;
        return Some(morpho_position_view(node, core, id, view.proxy).await);
    }

    None
}

/// Assemble one position from every angle the chain offers. Only the
/// token id itself is guaranteed; every other field degrades alone.
pub async fn snapshot_position(
    node: &NodeClient,
    cfg: &WindlassConfig,
    market: Address,
    nft: Address,
    token_id: u64,
    tracked: bool,
) -> PositionSnapshot {
    let id = U256::from(token_id);
    let (record, owner_direct, quoted_debt) = tokio::join!(
        soft("positions", market_position(node, market, id)),
        soft("ownerOf", node.position_owner(nft, id)),
        soft("quoteDebt", market_quote_debt(node, market, id)),
    );

    let adapter_view = match record.as_ref().map(|r| r.adapter) {
        Some(adapter) if !adapter.is_zero() => {
            soft("positionView", adapter_position_view(node, adapter, id)).await
        }
        _ => None,
    };

    let current_owner = owner_direct.or_else(|| adapter_view.as_ref().map(|v| v.owner));
    let venue = load_venue_position(node, cfg, record.as_ref(), adapter_view.as_ref()).await;

    let queue = match adapter_view.as_ref() {
        Some(view) => {
            load_queue_state(
                node,
                queue_provider_for(cfg, view.collateral_asset),
                view.reference_id,
                cfg.contracts.lido_withdrawal_queue,
                cfg.contracts.etherfi_withdraw_nft,
            )
            .await
        }
        None => QueueState::NotApplicable,
    };

    PositionSnapshot {
        token_id: id,
        record,
        adapter_view,
        current_owner,
        quoted_debt,
        venue,
        queue,
        tracked,
    }
}

async fn resolve_position_nft(
    node: &NodeClient,
    cfg: &WindlassConfig,
    market: Address,
) -> eyre::Result<Address> {
    match cfg.contracts.position_nft {
        Some(nft) => Ok(nft),
        None => market_position_nft(node, market)
            .await
            .context("resolve position token address"),
    }
}

/// Symbol and decimals for an asset that appears in a report.
#[derive(Debug, Clone)]
pub struct TokenDisplay {
    pub symbol: String,
    pub decimals: u8,
}

async fn load_token_meta(
    node: &NodeClient,
    addresses: BTreeSet<Address>,
) -> BTreeMap<Address, TokenDisplay> {
    let mut meta = BTreeMap::new();
    for token in addresses {
        let symbol = node.erc20_symbol(token).await;
        let decimals = soft("token decimals", node.erc20_decimals(token))
            .await
            .unwrap_or(18);
        meta.insert(token, TokenDisplay { symbol, decimals });
    }
    meta
}

#[derive(Debug, Clone)]
pub struct PositionsReport {
    pub block: BlockRef,
    pub wallet: Address,
    /// Asset the market lends, when configured; keys market amounts
    /// into [`PositionsReport::tokens`].
    pub loan_token: Option<Address>,
    pub summary: MarketSummary,
    pub positions: Vec<PositionSnapshot>,
    pub tokens: BTreeMap<Address, TokenDisplay>,
    pub scan_note: Option<String>,
}

/// Discover every position the wallet holds (log scan union manually
/// tracked ids) and snapshot each one.
pub async fn load_positions(
    resolver: &Resolver,
    pass: &Pass,
    cfg: &WindlassConfig,
    tracked: &TrackedIds,
) -> eyre::Result<PositionsReport> {
    let wallet = require_configured(cfg.wallet.address, "wallet.address")?;
    let market = require_configured(cfg.contracts.market, "contracts.market")?;
    let node = &pass.node;

    let nft = resolve_position_nft(node, cfg, market).await?;
    let expected = node
        .position_count(nft, wallet)
        .await
        .context("read position token balance")?;
    let expected = u64::try_from(expected).unwrap_or(u64::MAX);

    let scan_window = ScanWindow::default();
    let (summary, outcome) = tokio::join!(
        load_market_summary(node, market),
        scan_owned_token_ids(
            node,
            nft,
            wallet,
            expected,
            pass.latest.number,
            &scan_window
        ),
    );
    let outcome = outcome?;

    let mut ids: BTreeSet<u64> = BTreeSet::new();
    for id in &outcome.token_ids {
        match u64::try_from(*id) {
            Ok(v) => {
                ids.insert(v);
            }
            Err(_) => warn!(token_id = %id, "skipping oversized token id from logs"),
        }
    }
    for id in tracked.ids() {
        ids.insert(*id);
    }

    let mut set: JoinSet<PositionSnapshot> = JoinSet::new();
    for id in &ids {
        let node = node.clone();
        let cfg = cfg.clone();
        let token_id = *id;
        let is_tracked = tracked.contains(token_id);
        set.spawn(async move {
            snapshot_position(&node, &cfg, market, nft, token_id, is_tracked).await
        });
    }
    let mut positions = Vec::with_capacity(ids.len());
    while let Some(joined) = set.join_next().await {
        positions.push(joined.context("position snapshot task")?);
    }
    let mut assets: BTreeSet<Address> = BTreeSet::new();
    if let Some(weth) = cfg.tokens.weth {
        assets.insert(weth);
    }
    for snap in &positions {
        if let Some(view) = &snap.adapter_view {
            for token in [view.loan_asset, view.collateral_asset] {
                if !token.is_zero() {
                    assets.insert(token);
                }
            }
        }
    }
    let tokens = load_token_meta(node, assets).await;
    resolver.ensure_current(pass)?;

    // Newest first.
    positions.sort_unstable_by(|a, b| b.token_id.cmp(&a.token_id));

    Ok(PositionsReport {
        block: pass.latest,
        wallet,
        loan_token: cfg.tokens.weth,
        summary,
        positions,
        tokens,
        scan_note: outcome.note,
    })
}

/// Walk the transfer logs for the wallet's position tokens without
/// snapshotting any of them.
pub async fn scan_wallet_positions(
    resolver: &Resolver,
    pass: &Pass,
    cfg: &WindlassConfig,
    expected: Option<u64>,
) -> eyre::Result<(Address, ScanOutcome)> {
    let wallet = require_configured(cfg.wallet.address, "wallet.address")?;
    let market = require_configured(cfg.contracts.market, "contracts.market")?;
    let node = &pass.node;

    let nft = resolve_position_nft(node, cfg, market).await?;
    let expected = match expected {
        Some(count) => count,
        None => {
            let count = node
                .position_count(nft, wallet)
                .await
                .context("read position token balance")?;
            u64::try_from(count).unwrap_or(u64::MAX)
        }
    };
    let outcome = scan_owned_token_ids(
        node,
        nft,
        wallet,
        expected,
        pass.latest.number,
        &ScanWindow::default(),
    )
    .await?;
    resolver.ensure_current(pass)?;
    Ok((wallet, outcome))
}

#[derive(Debug, Clone)]
pub struct VaultOverview {
    pub vault: Address,
    pub block: BlockRef,
    pub asset: Option<Address>,
    pub asset_symbol: String,
    pub asset_decimals: Option<u8>,
    pub vault_decimals: Option<u8>,
    pub price_per_share: Option<U256>,
    pub total_assets: Option<U256>,
    pub wallet_shares: Option<U256>,
    /// Asset value of the wallet's shares, from `convertToAssets`.
    pub wallet_share_value: Option<U256>,
    pub max_withdraw: Option<U256>,
    pub wallet_asset_balance: Option<U256>,
    pub vault_allowance: Option<U256>,
    /// The figures the estimate was blended from, for disclosure.
    pub blend: BlendInputs,
    pub estimated_apr: Option<U256>,
    pub trailing: TrailingApr,
}

async fn load_blend_inputs(
    node: &NodeClient,
    cfg: &WindlassConfig,
    vault_addr: Address,
) -> BlendInputs {
    let Some(oracle) = cfg.contracts.apr_oracle else {
        return BlendInputs::default();
    };
    let strategy = soft(
        "default_queue",
        vault::vault_default_strategy(node, vault_addr),
    )
    .await
    .filter(|s| !s.is_zero());
    let Some(strategy) = strategy else {
        return BlendInputs::default();
    };

    let market = cfg.contracts.market;
    let (strategy_apr, allocation, rate_model, principal) = tokio::join!(
        soft(
            "getStrategyApr",
            vault::oracle_strategy_apr(node, oracle, strategy)
        ),
        soft(
            "strategies",
            vault::vault_strategy_allocation(node, vault_addr, strategy)
        ),
        async {
            match market {
                Some(m) => soft("rateModel", market_rate_model(node, m)).await,
                None => None,
            }
        },
        async {
            match market {
                Some(m) => {
                    soft(
                        "totalPrincipalActive",
                        market_total_principal_active(node, m),
                    )
                    .await
                }
                None => None,
            }
        },
    );
    let base_rate = match rate_model {
        Some(model) => soft("baseRateBps", rate_model_base_rate_bps(node, model)).await,
        None => None,
    };

    BlendInputs {
        strategy_apr_wad: strategy_apr,
        strategy_allocation: allocation,
        market_rate_bps: base_rate,
        total_principal_active: principal,
    }
}

/// Depositor-facing view of the vault. Works without a configured
/// wallet; the wallet columns stay empty then.
pub async fn load_vault_overview(
    resolver: &Resolver,
    pass: &Pass,
    cfg: &WindlassConfig,
) -> eyre::Result<VaultOverview> {
    let vault_addr = require_configured(cfg.contracts.vault, "contracts.vault")?;
    let node = &pass.node;

    let (asset, vault_decimals, price_per_share, total_assets, trailing, blend) = tokio::join!(
        soft("vault asset", vault::vault_asset(node, vault_addr)),
        soft("vault decimals", vault::vault_decimals(node, vault_addr)),
        soft(
            "pricePerShare",
            vault::vault_price_per_share(node, vault_addr)
        ),
        soft("totalAssets", vault::vault_total_assets(node, vault_addr)),
        vault::trailing_apr(node, vault_addr, pass.latest),
        load_blend_inputs(node, cfg, vault_addr),
    );
    let estimated_apr = vault::estimated_apr_wad(&blend);

    let (asset_symbol, asset_decimals) = match asset {
        Some(token) => (
            node.erc20_symbol(token).await,
            soft("asset decimals", node.erc20_decimals(token)).await,
        ),
        None => ("ERC20".to_owned(), None),
    };

    let (wallet_shares, max_withdraw) = match cfg.wallet.address {
        Some(wallet) => tokio::join!(
            soft(
                "vault balanceOf",
                vault::vault_share_balance(node, vault_addr, wallet)
            ),
            soft(
                "maxWithdraw",
                vault::vault_max_withdraw(node, vault_addr, wallet)
            ),
        ),
        None => (None, None),
    };
    let (wallet_asset_balance, vault_allowance) = match (cfg.wallet.address, asset) {
        (Some(wallet), Some(token)) => tokio::join!(
            soft("asset balanceOf", node.erc20_balance_of(token, wallet)),
            soft(
                "asset allowance",
                node.erc20_allowance(token, wallet, vault_addr)
            ),
        ),
        _ => (None, None),
    };

    let wallet_share_value = match wallet_shares {
        Some(shares) => {
            let converted = soft(
                "convertToAssets",
                vault::vault_convert_to_assets(node, vault_addr, shares),
            )
            .await;
            // Fall back to a local price-per-share conversion when the
            // vault cannot answer directly.
            converted.or_else(|| match (price_per_share, vault_decimals) {
                (Some(pps), Some(dec)) => vault::shares_asset_value(shares, pps, dec),
                _ => None,
            })
        }
        None => None,
    };
    resolver.ensure_current(pass)?;

    Ok(VaultOverview {
        vault: vault_addr,
        block: pass.latest,
        asset,
        asset_symbol,
        asset_decimals,
        vault_decimals,
        price_per_share,
        total_assets,
        wallet_shares,
        wallet_share_value,
        max_withdraw,
        wallet_asset_balance,
        vault_allowance,
        blend,
        estimated_apr,
        trailing,
    })
}

/// The minimum `prepare deposit` and `prepare withdraw` need: the asset
/// for parsing amounts, and the allowance for the approval gate.
#[derive(Debug, Clone)]
pub struct VaultGate {
    pub vault: Address,
    pub wallet: Address,
    pub asset: Address,
    pub asset_symbol: String,
    pub asset_decimals: u8,
    pub allowance: Option<U256>,
}

pub async fn load_vault_gate(
    resolver: &Resolver,
    pass: &Pass,
    cfg: &WindlassConfig,
) -> eyre::Result<VaultGate> {
    let vault_addr = require_configured(cfg.contracts.vault, "contracts.vault")?;
    let wallet = require_configured(cfg.wallet.address, "wallet.address")?;
    let node = &pass.node;

    let asset = vault::vault_asset(node, vault_addr)
        .await
        .context("read vault asset")?;
    let (asset_symbol, asset_decimals, allowance) = tokio::join!(
        node.erc20_symbol(asset),
        node.erc20_decimals(asset),
        soft(
            "asset allowance",
            node.erc20_allowance(asset, wallet, vault_addr)
        ),
    );
    let asset_decimals = asset_decimals.context("read vault asset decimals")?;
    resolver.ensure_current(pass)?;

    Ok(VaultGate {
        vault: vault_addr,
        wallet,
        asset,
        asset_symbol,
        asset_decimals,
        allowance,
    })
}

/// Everything `prepare open` needs before calldata can be built.
#[derive(Debug, Clone)]
pub struct OpenContext {
    pub route: RouteSpec,
    pub market: Address,
    pub wallet: Address,
    pub loan_asset: Address,
    pub available_liquidity: U256,
    pub loan_decimals: u8,
    pub collateral_decimals: u8,
    /// Collateral the wallet already holds at the venue, to be migrated.
    pub venue_collateral: Option<U256>,
    /// Loan-asset debt the wallet already owes at the venue.
    pub venue_debt: Option<U256>,
    pub borrow_rate_bps: Option<U256>,
    pub conditions: VenueConditions,
    /// Aave routes: the reserve token pulled as collateral.
    pub collateral_reserve_token: Option<Address>,
    pub morpho_params: Option<MorphoMarketParams>,
}

/// Venue-side facts for one route: gate inputs plus the balances that
/// drive suggested sizing.
struct VenueProbe {
    conditions: VenueConditions,
    venue_collateral: Option<U256>,
    venue_debt: Option<U256>,
    collateral_reserve_token: Option<Address>,
    morpho_params: Option<MorphoMarketParams>,
}

async fn probe_aave_route(
    node: &NodeClient,
    cfg: &WindlassConfig,
    route: &RouteSpec,
    wallet: Address,
    loan_asset: Address,
) -> VenueProbe {
    let atoken_override = if Some(route.collateral_token) == cfg.tokens.wsteth {
        cfg.tokens.awsteth
    } else {
        None
    };
    let atoken = resolve_aave_collateral_token(
        node,
        cfg.contracts.aave_pool,
        cfg.contracts.aave_data_provider,
        atoken_override,
        route.collateral_token,
    )
    .await;
    let (allowance, venue_collateral) = match atoken {
        Some(token) => tokio::join!(
            soft(
                "reserve allowance",
                node.erc20_allowance(token, wallet, route.receiver)
            ),
            soft(
                "aave collateral balance",
                node.erc20_balance_of(token, wallet)
            ),
        ),
        None => (None, None),
    };
    // Debt lives on the loan asset's variable debt token, a different
    // reserve than the collateral.
    let loan_reserve = resolve_aave_reserve(
        node,
        cfg.contracts.aave_pool,
        cfg.contracts.aave_data_provider,
        loan_asset,
    )
    .await;
    let venue_debt = match loan_reserve {
        Some(r) if !r.variable_debt_token.is_zero() => {
            soft(
                "aave debt balance",
                node.erc20_balance_of(r.variable_debt_token, wallet),
            )
            .await
        }
        _ => None,
    };
    VenueProbe {
        conditions: VenueConditions::Aave {
            atoken,
            allowance,
            receiver: route.receiver,
        },
        venue_collateral,
        venue_debt,
        collateral_reserve_token: atoken,
        morpho_params: None,
    }
}

async fn probe_morpho_route(
    node: &NodeClient,
    route: &RouteSpec,
    wallet: Address,
    loan_asset: Address,
) -> eyre::Result<VenueProbe> {
    let Some(params) = route.morpho else {
        eyre::bail!("morpho route resolved without market parameters");
    };
    let (market_params, authorized, wallet_view) = tokio::join!(
        soft(
            "idToMarketParams",
            morpho_market_params(node, params.core, params.market_id)
        ),
        soft(
            "isAuthorized",
            morpho_is_authorized(node, params.core, wallet, route.receiver)
        ),
        morpho_position_view(node, params.core, params.market_id, wallet),
    );
    let params_issue =
        morpho_params_issue(market_params.as_ref(), loan_asset, route.collateral_token);
    Ok(VenueProbe {
        conditions: VenueConditions::Morpho {
            params_issue,
            authorized,
            receiver: route.receiver,
        },
        venue_collateral: wallet_view.collateral(),
        venue_debt: wallet_view.debt(),
        collateral_reserve_token: None,
        morpho_params: market_params,
    })
}

pub async fn load_open_context(
    resolver: &Resolver,
    pass: &Pass,
    cfg: &WindlassConfig,
    key: RouteKey,
) -> eyre::Result<OpenContext> {
    let route = resolve_route(cfg, key)?;
    let market = require_configured(cfg.contracts.market, "contracts.market")?;
    let wallet = require_configured(cfg.wallet.address, "wallet.address")?;
    let loan_asset = require_configured(cfg.tokens.weth, "tokens.weth")?;
    let node = &pass.node;

    let (available_liquidity, loan_decimals, collateral_decimals) = tokio::join!(
        market_available_liquidity(node, market),
        node.erc20_decimals(loan_asset),
        node.erc20_decimals(route.collateral_token),
    );
    let available_liquidity = available_liquidity.context("read available liquidity")?;
    let loan_decimals = loan_decimals.context("loan asset decimals")?;
    let collateral_decimals = collateral_decimals.context("collateral token decimals")?;

    let (rate_model, premium) = tokio::join!(
        soft("rateModel", market_rate_model(node, market)),
        soft(
            "adapterRiskPremiumBps",
            market_adapter_premium_bps(node, market, route.adapter)
        ),
    );
    let base = match rate_model {
        Some(model) => soft("baseRateBps", rate_model_base_rate_bps(node, model)).await,
        None => None,
    };
    let borrow_rate_bps = current_borrow_rate_bps(base, premium);

    let probe = match route.venue {
        Venue::Aave => probe_aave_route(node, cfg, &route, wallet, loan_asset).await,
        Venue::Morpho => probe_morpho_route(node, &route, wallet, loan_asset).await?,
    };
    resolver.ensure_current(pass)?;

    Ok(OpenContext {
        route,
        market,
        wallet,
        loan_asset,
        available_liquidity,
        loan_decimals,
        collateral_decimals,
        venue_collateral: probe.venue_collateral,
        venue_debt: probe.venue_debt,
        borrow_rate_bps,
        conditions: probe.conditions,
        collateral_reserve_token: probe.collateral_reserve_token,
        morpho_params: probe.morpho_params,
    })
}

#[derive(Debug, Clone)]
pub struct SettleContext {
    pub snapshot: PositionSnapshot,
    pub market: Address,
    pub wallet: Address,
}

pub async fn load_settle_context(
    resolver: &Resolver,
    pass: &Pass,
    cfg: &WindlassConfig,
    token_id: u64,
    tracked: bool,
) -> eyre::Result<SettleContext> {
    let wallet = require_configured(cfg.wallet.address, "wallet.address")?;
    let market = require_configured(cfg.contracts.market, "contracts.market")?;
    let node = &pass.node;

    let nft = resolve_position_nft(node, cfg, market).await?;
    let snapshot = snapshot_position(node, cfg, market, nft, token_id, tracked).await;
    if snapshot.record.is_none() {
        eyre::bail!("position #{token_id} is unknown to the market");
    }
    resolver.ensure_current(pass)?;

    Ok(SettleContext {
        snapshot,
        market,
        wallet,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collateral_asset_selects_the_queue_provider() {
        let cfg = WindlassConfig::default();
        let wsteth = cfg.tokens.wsteth.unwrap_or_default();
        let weeth = cfg.tokens.weeth.unwrap_or_default();

        assert_eq!(queue_provider_for(&cfg, wsteth), Some(QueueProvider::Lido));
        assert_eq!(queue_provider_for(&cfg, weeth), Some(QueueProvider::EtherFi));
        assert_eq!(queue_provider_for(&cfg, Address::ZERO), None);
    }

    #[test]
    fn unknown_tokens_never_map_to_a_queue() {
        let mut cfg = WindlassConfig::default();
        let wsteth = cfg.tokens.wsteth.unwrap_or_default();
        cfg.tokens.wsteth = None;
        cfg.tokens.weeth = None;
        assert_eq!(queue_provider_for(&cfg, wsteth), None);
    }
}
