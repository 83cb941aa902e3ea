//! Market and adapter reads for individual positions.
//!
//! The market contract is the source of truth for principal and state;
//! the adapter adds the venue-facing view (proxy, queue reference id,
//! expected unlock). Unknown numeric states are rendered as-is rather
//! than guessed at, so a contract upgrade shows up in output instead of
//! being silently mislabeled.

use crate::evm::NodeClient;
use crate::queue::QueueState;
use crate::venues::VenuePosition;
use alloy::primitives::{Address, U256};
use alloy::sol;
use eyre::Context as _;
use std::fmt;

sol! {
    #[sol(rpc)]
    contract ILeverageMarket {
        event PositionOpened(
            uint256 indexed tokenId,
            address indexed owner,
            address indexed receiver,
            address asset,
            uint256 amount,
            address collateralAsset,
            uint256 collateralAmount
        );

        function availableLiquidity() external view returns (uint256);
        function totalPrincipalActive() external view returns (uint256);
        function rateModel() external view returns (address);
        function adapterRiskPremiumBps(address adapter) external view returns (uint256);
        function POSITION_NFT() external view returns (address);
        function positions(uint256 tokenId)
            external view returns (address owner, address adapter, address receiver, uint256 principal, uint256 collateralAmount, uint256 unlockTime, uint256 state, uint256 openedAt);
        function quoteDebt(uint256 tokenId) external view returns (uint256);
        function openPosition(uint256 principal, address adapter, address receiver, uint256 collateralAmount, bytes callbackData) external returns (uint256 tokenId);
        function settleAndRepay(uint256 tokenId, address to, bytes data) external;
    }
}

sol! {
    #[sol(rpc)]
    contract IRateModel {
        function baseRateBps() external view returns (uint256);
    }
}

sol! {
    #[sol(rpc)]
    contract IPositionAdapter {
        function positionView(uint256 tokenId)
            external view returns (address owner, address proxy, address loanAsset, address collateralAsset, uint256 principal, uint256 collateralAmount, uint64 expectedUnlockTime, uint256 referenceId, uint8 status);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarketState {
    Active,
    Ready,
    Closed,
    Defaulted,
    Unknown(U256),
}

impl MarketState {
    pub fn from_raw(v: U256) -> Self {
        match u64::try_from(v) {
            Ok(1) => Self::Active,
            Ok(2) => Self::Ready,
            Ok(3) => Self::Closed,
            Ok(4) => Self::Defaulted,
            _ => Self::Unknown(v),
        }
    }
}

impl fmt::Display for MarketState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Ready => write!(f, "ready"),
            Self::Closed => write!(f, "closed"),
            Self::Defaulted => write!(f, "defaulted"),
            Self::Unknown(v) => write!(f, "state {v}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterStatus {
    Open,
    Closed,
    Unknown(u8),
}

impl AdapterStatus {
    pub fn from_raw(v: u8) -> Self {
        match v {
            1 => Self::Open,
            2 => Self::Closed,
            other => Self::Unknown(other),
        }
    }
}

impl fmt::Display for AdapterStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open => write!(f, "open"),
            Self::Closed => write!(f, "closed"),
            Self::Unknown(v) => write!(f, "status {v}"),
        }
    }
}

/// The market's record for one token id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarketPositionRecord {
    pub owner: Address,
    pub adapter: Address,
    pub receiver: Address,
    pub principal: U256,
    pub collateral_amount: U256,
    pub unlock_time: u64,
    pub state: MarketState,
    pub opened_at: u64,
}

/// The adapter's view of the same position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdapterPositionView {
    pub owner: Address,
    pub proxy: Address,
    pub loan_asset: Address,
    pub collateral_asset: Address,
    pub principal: U256,
    pub collateral_amount: U256,
    pub expected_unlock_time: u64,
    pub reference_id: U256,
    pub status: AdapterStatus,
}

/// Everything resolved for one position in one pass. Each field degrades
/// independently; `None` means that read failed or did not apply.
#[derive(Debug, Clone)]
pub struct PositionSnapshot {
    pub token_id: U256,
    pub record: Option<MarketPositionRecord>,
    pub adapter_view: Option<AdapterPositionView>,
    /// `ownerOf` result, falling back to the adapter's recorded owner.
    pub current_owner: Option<Address>,
    pub quoted_debt: Option<U256>,
    pub venue: Option<VenuePosition>,
    pub queue: QueueState,
    pub tracked: bool,
}

impl PositionSnapshot {
    /// A position is actionable only while the market says active and the
    /// adapter says open; anything unknown is treated as not actionable.
    pub fn is_open(&self) -> bool {
        let market_active = self
            .record
            .is_some_and(|r| r.state == MarketState::Active);
        let adapter_open = self
            .adapter_view
            .is_some_and(|v| v.status == AdapterStatus::Open);
        market_active && adapter_open
    }

    pub fn owner_matches(&self, wallet: Address) -> bool {
        self.current_owner == Some(wallet)
    }

    /// The adapter's expected unlock wins over the market record; zero
    /// means no view reported one.
    pub fn unlock_time(&self) -> u64 {
        self.adapter_view
            .map(|v| v.expected_unlock_time)
            .or_else(|| self.record.map(|r| r.unlock_time))
            .unwrap_or(0)
    }
}

fn clamp_u64(v: U256) -> u64 {
    u64::try_from(v).unwrap_or(u64::MAX)
}

pub async fn market_available_liquidity(node: &NodeClient, market: Address) -> eyre::Result<U256> {
    let c = ILeverageMarket::new(market, node.provider());
    let v = c
        .availableLiquidity()
        .call()
        .await
        .context("market availableLiquidity")?;
    Ok(v)
}

pub async fn market_total_principal_active(
    node: &NodeClient,
    market: Address,
) -> eyre::Result<U256> {
    let c = ILeverageMarket::new(market, node.provider());
    let v = c
        .totalPrincipalActive()
        .call()
        .await
        .context("market totalPrincipalActive")?;
    Ok(v)
}

pub async fn market_rate_model(node: &NodeClient, market: Address) -> eyre::Result<Address> {
    let c = ILeverageMarket::new(market, node.provider());
    let v = c.rateModel().call().await.context("market rateModel")?;
    Ok(v)
}

pub async fn market_adapter_premium_bps(
    node: &NodeClient,
    market: Address,
    adapter: Address,
) -> eyre::Result<U256> {
    let c = ILeverageMarket::new(market, node.provider());
    let v = c
        .adapterRiskPremiumBps(adapter)
        .call()
        .await
        .context("market adapterRiskPremiumBps")?;
    Ok(v)
}

pub async fn rate_model_base_rate_bps(node: &NodeClient, model: Address) -> eyre::Result<U256> {
    let c = IRateModel::new(model, node.provider());
    let v = c.baseRateBps().call().await.context("rate model baseRateBps")?;
    Ok(v)
}

pub async fn market_position_nft(node: &NodeClient, market: Address) -> eyre::Result<Address> {
    let c = ILeverageMarket::new(market, node.provider());
    let v = c.POSITION_NFT().call().await.context("market POSITION_NFT")?;
    Ok(v)
}

pub async fn market_position(
    node: &NodeClient,
    market: Address,
    token_id: U256,
) -> eyre::Result<MarketPositionRecord> {
    let c = ILeverageMarket::new(market, node.provider());
    let p = c
        .positions(token_id)
        .call()
        .await
        .context("market positions")?;
    Ok(MarketPositionRecord {
        owner: p.owner,
        adapter: p.adapter,
        receiver: p.receiver,
        principal: p.principal,
        collateral_amount: p.collateralAmount,
        unlock_time: clamp_u64(p.unlockTime),
        state: MarketState::from_raw(p.state),
        opened_at: clamp_u64(p.openedAt),
    })
}

pub async fn market_quote_debt(
    node: &NodeClient,
    market: Address,
    token_id: U256,
) -> eyre::Result<U256> {
    let c = ILeverageMarket::new(market, node.provider());
    let v = c
        .quoteDebt(token_id)
        .call()
        .await
        .context("market quoteDebt")?;
    Ok(v)
}

pub async fn adapter_position_view(
    node: &NodeClient,
    adapter: Address,
    token_id: U256,
) -> eyre::Result<AdapterPositionView> {
    let c = IPositionAdapter::new(adapter, node.provider());
    let p = c
        .positionView(token_id)
        .call()
        .await
        .context("adapter positionView")?;
    Ok(AdapterPositionView {
        owner: p.owner,
        proxy: p.proxy,
        loan_asset: p.loanAsset,
        collateral_asset: p.collateralAsset,
        principal: p.principal,
        collateral_amount: p.collateralAmount,
        expected_unlock_time: p.expectedUnlockTime,
        reference_id: p.referenceId,
        status: AdapterStatus::from_raw(p.status),
    })
}

/// Base rate plus the adapter's risk premium. A missing premium falls
/// back to the base rate alone; a missing base rate is unavailable.
pub fn current_borrow_rate_bps(base: Option<U256>, premium: Option<U256>) -> Option<U256> {
    let base = base?;
    Some(base.saturating_add(premium.unwrap_or(U256::ZERO)))
}
