//! Depositor-side vault reads and APR estimation.
//!
//! The lending vault is ERC-4626 shaped with a Yearn-style strategy
//! queue. Estimated APR is a capital-weighted blend of the default
//! strategy's oracle APR and the leverage market's borrow rate; the
//! trailing APR is realized price-per-share movement over a seven-day
//! window, annualized. Both stay unavailable (with a reason) rather
//! than degrading to zero.

use crate::blocktime::{block_at_window_start, WindowStart};
use crate::evm::{BlockRef, NodeClient};
use crate::wad::{annualized_apr_wad, blend_weighted_apr, bps_to_wad};
use alloy::eips::BlockId;
use alloy::primitives::{Address, I256, U256};
use alloy::sol;
use eyre::Context as _;
use tracing::debug;

pub const TRAILING_WINDOW_SECS: u64 = 7 * 24 * 60 * 60;

sol! {
    #[sol(rpc)]
    contract IYieldVault {
        function asset() external view returns (address);
        function decimals() external view returns (uint8);
        function balanceOf(address owner) external view returns (uint256);
        function totalAssets() external view returns (uint256);
        function convertToAssets(uint256 shares) external view returns (uint256);
        function maxWithdraw(address owner) external view returns (uint256);
        function pricePerShare() external view returns (uint256);
        function default_queue(uint256 index) external view returns (address);
        function strategies(address strategy)
            external view returns (uint256 activation, uint256 last_report, uint256 current_debt, uint256 max_debt);
        function deposit(uint256 assets, address receiver) external returns (uint256 shares);
        function withdraw(uint256 assets, address receiver, address owner) external returns (uint256 shares);
    }
}

sol! {
    #[sol(rpc)]
    contract IAprOracle {
        function getStrategyApr(address strategy, int256 debtChange) external view returns (uint256);
    }
}

pub async fn vault_asset(node: &NodeClient, vault: Address) -> eyre::Result<Address> {
    let c = IYieldVault::new(vault, node.provider());
    let v = c.asset().call().await.context("vault asset")?;
    Ok(v)
}

pub async fn vault_decimals(node: &NodeClient, vault: Address) -> eyre::Result<u8> {
    let c = IYieldVault::new(vault, node.provider());
    let v = c.decimals().call().await.context("vault decimals")?;
    Ok(v)
}

pub async fn vault_total_assets(node: &NodeClient, vault: Address) -> eyre::Result<U256> {
    let c = IYieldVault::new(vault, node.provider());
    let v = c.totalAssets().call().await.context("vault totalAssets")?;
    Ok(v)
}

pub async fn vault_share_balance(
    node: &NodeClient,
    vault: Address,
    owner: Address,
) -> eyre::Result<U256> {
    let c = IYieldVault::new(vault, node.provider());
    let v = c.balanceOf(owner).call().await.context("vault balanceOf")?;
    Ok(v)
}

pub async fn vault_convert_to_assets(
    node: &NodeClient,
    vault: Address,
    shares: U256,
) -> eyre::Result<U256> {
    let c = IYieldVault::new(vault, node.provider());
    let v = c
        .convertToAssets(shares)
        .call()
        .await
        .context("vault convertToAssets")?;
    Ok(v)
}

pub async fn vault_max_withdraw(
    node: &NodeClient,
    vault: Address,
    owner: Address,
) -> eyre::Result<U256> {
    let c = IYieldVault::new(vault, node.provider());
    let v = c
        .maxWithdraw(owner)
        .call()
        .await
        .context("vault maxWithdraw")?;
    Ok(v)
}

pub async fn vault_price_per_share(node: &NodeClient, vault: Address) -> eyre::Result<U256> {
    let c = IYieldVault::new(vault, node.provider());
    let v = c
        .pricePerShare()
        .call()
        .await
        .context("vault pricePerShare")?;
    Ok(v)
}

pub async fn vault_price_per_share_at(
    node: &NodeClient,
    vault: Address,
    block_number: u64,
) -> eyre::Result<U256> {
    let c = IYieldVault::new(vault, node.provider());
    let v = c
        .pricePerShare()
        .call()
        .block(BlockId::number(block_number))
        .await
        .context("vault pricePerShare at block")?;
    Ok(v)
}

/// First entry of the withdrawal queue; allocation flows there first.
pub async fn vault_default_strategy(node: &NodeClient, vault: Address) -> eyre::Result<Address> {
    let c = IYieldVault::new(vault, node.provider());
    let v = c
        .default_queue(U256::ZERO)
        .call()
        .await
        .context("vault default_queue")?;
    Ok(v)
}

pub async fn vault_strategy_allocation(
    node: &NodeClient,
    vault: Address,
    strategy: Address,
) -> eyre::Result<U256> {
    let c = IYieldVault::new(vault, node.provider());
    let s = c
        .strategies(strategy)
        .call()
        .await
        .context("vault strategies")?;
    Ok(s.current_debt)
}

pub async fn oracle_strategy_apr(
    node: &NodeClient,
    oracle: Address,
    strategy: Address,
) -> eyre::Result<U256> {
    let c = IAprOracle::new(oracle, node.provider());
    let v = c
        .getStrategyApr(strategy, I256::ZERO)
        .call()
        .await
        .context("apr oracle getStrategyApr")?;
    Ok(v)
}

/// Vault shares valued in the underlying asset, truncating in the
/// holder's disfavor.
pub fn shares_asset_value(shares: U256, price_per_share: U256, decimals: u8) -> Option<U256> {
    let scale = crate::amount::pow10(decimals).ok()?;
    shares.checked_mul(price_per_share).map(|v| v / scale)
}

pub fn needs_asset_approval(amount: U256, allowance: U256) -> bool {
    !amount.is_zero() && allowance < amount
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BlendInputs {
    pub strategy_apr_wad: Option<U256>,
    pub strategy_allocation: Option<U256>,
    pub market_rate_bps: Option<U256>,
    pub total_principal_active: Option<U256>,
}

/// Blend the strategy APR (weighted by its allocation) with the market
/// borrow rate (weighted by active principal). Any missing input makes
/// the estimate unavailable.
pub fn estimated_apr_wad(inputs: &BlendInputs) -> Option<U256> {
    let strategy_apr = inputs.strategy_apr_wad?;
    let allocation = inputs.strategy_allocation?;
    let rate_wad = bps_to_wad(inputs.market_rate_bps?)?;
    let principal = inputs.total_principal_active?;
    blend_weighted_apr(strategy_apr, allocation, rate_wad, principal)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrailingApr {
    Available(I256),
    Unavailable(&'static str),
}

impl TrailingApr {
    pub fn apr(&self) -> Option<I256> {
        match self {
            Self::Available(v) => Some(*v),
            Self::Unavailable(_) => None,
        }
    }

    pub fn note(&self) -> Option<&'static str> {
        match self {
            Self::Available(_) => None,
            Self::Unavailable(reason) => Some(reason),
        }
    }
}

const REASON_YOUNG_CHAIN: &str = "chain has less than 7 days of history";
const REASON_NOT_LIVE: &str = "vault has not been live for 7 days";
const REASON_UNREADABLE: &str = "unable to read price-per-share history";

/// Realized APR over the trailing window ending at `latest`.
pub async fn trailing_apr(node: &NodeClient, vault: Address, latest: BlockRef) -> TrailingApr {
    let start = match block_at_window_start(node, latest, TRAILING_WINDOW_SECS).await {
        Ok(WindowStart::Found(located)) => located,
        Ok(WindowStart::InsufficientHistory) => {
            return TrailingApr::Unavailable(REASON_YOUNG_CHAIN);
        }
        Err(err) => {
            debug!(%err, "window-start lookup failed");
            return TrailingApr::Unavailable(REASON_UNREADABLE);
        }
    };
    debug!(
        block = start.block.number,
        probes = start.probes,
        "window start located"
    );

    match node.is_contract_at(vault, start.block.number).await {
        Ok(true) => {}
        Ok(false) => return TrailingApr::Unavailable(REASON_NOT_LIVE),
        Err(err) => {
            debug!(%err, "historical code lookup failed");
            return TrailingApr::Unavailable(REASON_UNREADABLE);
        }
    }

    let historical = match vault_price_per_share_at(node, vault, start.block.number).await {
        Ok(v) => v,
        Err(err) => {
            debug!(%err, "historical price-per-share unavailable");
            return TrailingApr::Unavailable(REASON_UNREADABLE);
        }
    };
    if historical.is_zero() {
        return TrailingApr::Unavailable(REASON_NOT_LIVE);
    }
    let current = match vault_price_per_share(node, vault).await {
        Ok(v) => v,
        Err(err) => {
            debug!(%err, "current price-per-share unavailable");
            return TrailingApr::Unavailable(REASON_UNREADABLE);
        }
    };

    match annualized_apr_wad(current, historical, TRAILING_WINDOW_SECS) {
        Some(apr) => TrailingApr::Available(apr),
        None => TrailingApr::Unavailable(REASON_UNREADABLE),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wad::WAD;

    fn u(n: u64) -> U256 {
        U256::from(n)
    }

    #[test]
    fn share_value_truncates_toward_the_holder() {
        let shares = u(3_000_000_000_000_000_000);
        let pps = u(1_500_000_000_000_000_000);
        assert_eq!(
            shares_asset_value(shares, pps, 18),
            Some(u(4_500_000_000_000_000_000))
        );
        assert_eq!(shares_asset_value(u(1), u(1), 18), Some(U256::ZERO));
        assert_eq!(shares_asset_value(U256::ZERO, WAD, 18), Some(U256::ZERO));
    }

    #[test]
    fn approval_needed_only_below_the_amount() {
        assert!(needs_asset_approval(u(100), u(99)));
        assert!(!needs_asset_approval(u(100), u(100)));
        assert!(!needs_asset_approval(U256::ZERO, U256::ZERO));
    }

    #[test]
    fn estimate_requires_every_input() {
        let full = BlendInputs {
            strategy_apr_wad: bps_to_wad(u(400)),
            strategy_allocation: Some(u(100)),
            market_rate_bps: Some(u(200)),
            total_principal_active: Some(u(300)),
        };
        assert_eq!(estimated_apr_wad(&full), bps_to_wad(u(250)));

        for missing in 0..4_usize {
            let mut inputs = full;
            match missing {
                0 => inputs.strategy_apr_wad = None,
                1 => inputs.strategy_allocation = None,
                2 => inputs.market_rate_bps = None,
                _ => inputs.total_principal_active = None,
            }
            assert_eq!(estimated_apr_wad(&inputs), None, "input {missing} ignored");
        }
    }

    #[test]
    fn estimate_with_idle_capital_everywhere_is_unavailable() {
        let inputs = BlendInputs {
            strategy_apr_wad: Some(WAD),
            strategy_allocation: Some(U256::ZERO),
            market_rate_bps: Some(u(100)),
            total_principal_active: Some(U256::ZERO),
        };
        assert_eq!(estimated_apr_wad(&inputs), None);
    }

    #[test]
    fn trailing_accessors_split_value_and_note() {
        let ok = TrailingApr::Available(I256::ZERO);
        assert_eq!(ok.apr(), Some(I256::ZERO));
        assert_eq!(ok.note(), None);

        let gap = TrailingApr::Unavailable(REASON_NOT_LIVE);
        assert_eq!(gap.apr(), None);
        assert_eq!(gap.note(), Some(REASON_NOT_LIVE));
    }
}
