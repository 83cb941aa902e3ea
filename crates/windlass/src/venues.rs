//! Venue-side chain reads: Aave reserve discovery and Morpho markets.
//!
//! Reads here degrade per field. A revert or decode failure leaves the
//! affected figure `None` and the rest of the view intact; rendering
//! turns `None` into "not available" rather than a fake zero.

use crate::evm::NodeClient;
use crate::routes::Venue;
use crate::wad::shares_to_assets_up;
use alloy::primitives::{Address, B256, U256};
use alloy::sol;
use eyre::Context as _;
use tracing::debug;

sol! {
    #[sol(rpc)]
    contract IAavePool {
        function ADDRESSES_PROVIDER() external view returns (address);
    }
}

sol! {
    #[sol(rpc)]
    contract IAaveAddressesProvider {
        function getPoolDataProvider() external view returns (address);
    }
}

sol! {
    #[sol(rpc)]
    contract IAaveProtocolDataProvider {
        function getReserveTokensAddresses(address asset)
            external view returns (address aTokenAddress, address stableDebtTokenAddress, address variableDebtTokenAddress);
    }
}

sol! {
    #[sol(rpc)]
    contract IMorpho {
        function idToMarketParams(bytes32 id)
            external view returns (address loanToken, address collateralToken, address oracle, address irm, uint256 lltv);
        function position(bytes32 id, address user)
            external view returns (uint256 supplyShares, uint128 borrowShares, uint128 collateral);
        function market(bytes32 id)
            external view returns (uint128 totalSupplyAssets, uint128 totalSupplyShares, uint128 totalBorrowAssets, uint128 totalBorrowShares, uint128 lastUpdate, uint128 fee);
        function isAuthorized(address authorizer, address authorized) external view returns (bool);
        function setAuthorization(address authorized, bool newIsAuthorized) external;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AaveReserveTokens {
    pub atoken: Address,
    pub variable_debt_token: Address,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MorphoMarketParams {
    pub loan_token: Address,
    pub collateral_token: Address,
    pub oracle: Address,
    pub irm: Address,
    pub lltv: U256,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MorphoMarketTotals {
    pub total_borrow_assets: U256,
    pub total_borrow_shares: U256,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MorphoUserPosition {
    pub supply_shares: U256,
    pub borrow_shares: U256,
    pub collateral: U256,
}

/// What the venue itself holds for a position's proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VenuePosition {
    Aave {
        supplied: Option<U256>,
        debt: Option<U256>,
    },
    Morpho {
        collateral: Option<U256>,
        debt: Option<U256>,
    },
}

impl VenuePosition {
    pub fn venue(&self) -> Venue {
        match self {
            Self::Aave { .. } => Venue::Aave,
            Self::Morpho { .. } => Venue::Morpho,
        }
    }

    pub fn debt(&self) -> Option<U256> {
        match self {
            Self::Aave { debt, .. } | Self::Morpho { debt, .. } => *debt,
        }
    }

    pub fn collateral(&self) -> Option<U256> {
        match self {
            Self::Aave { supplied, .. } => *supplied,
            Self::Morpho { collateral, .. } => *collateral,
        }
    }
}

/// Walk `pool -> ADDRESSES_PROVIDER -> data provider -> reserve tokens`.
/// A configured data provider skips the first two hops.
pub async fn resolve_aave_reserve(
    node: &NodeClient,
    pool: Option<Address>,
    data_provider_override: Option<Address>,
    asset: Address,
) -> Option<AaveReserveTokens> {
    let data_provider = match data_provider_override {
        Some(dp) => dp,
        None => {
            let pool = pool?;
            let addresses_provider = match IAavePool::new(pool, node.provider())
                .ADDRESSES_PROVIDER()
                .call()
                .await
            {
                Ok(v) => v,
                Err(err) => {
                    debug!(%err, %pool, "aave addresses provider unavailable");
                    return None;
                }
            };
            match IAaveAddressesProvider::new(addresses_provider, node.provider())
                .getPoolDataProvider()
                .call()
                .await
            {
                Ok(v) => v,
                Err(err) => {
                    debug!(%err, %addresses_provider, "aave data provider unavailable");
                    return None;
                }
            }
        }
    };

    match IAaveProtocolDataProvider::new(data_provider, node.provider())
        .getReserveTokensAddresses(asset)
        .call()
        .await
    {
        Ok(tokens) if !tokens.aTokenAddress.is_zero() => Some(AaveReserveTokens {
            atoken: tokens.aTokenAddress,
            variable_debt_token: tokens.variableDebtTokenAddress,
        }),
        Ok(_) => {
            debug!(%asset, "asset has no aave reserve");
            None
        }
        Err(err) => {
            debug!(%err, %asset, "aave reserve tokens unavailable");
            None
        }
    }
}

/// The interest-bearing token supplied as collateral on Aave routes. A
/// configured override wins over on-chain discovery.
pub async fn resolve_aave_collateral_token(
    node: &NodeClient,
    pool: Option<Address>,
    data_provider_override: Option<Address>,
    atoken_override: Option<Address>,
    asset: Address,
) -> Option<Address> {
    if let Some(atoken) = atoken_override {
        return Some(atoken);
    }
    resolve_aave_reserve(node, pool, data_provider_override, asset)
        .await
        .map(|r| r.atoken)
}

pub async fn morpho_market_params(
    node: &NodeClient,
    core: Address,
    id: B256,
) -> eyre::Result<MorphoMarketParams> {
    let c = IMorpho::new(core, node.provider());
    let p = c
        .idToMarketParams(id)
        .call()
        .await
        .context("morpho idToMarketParams")?;
    Ok(MorphoMarketParams {
        loan_token: p.loanToken,
        collateral_token: p.collateralToken,
        oracle: p.oracle,
        irm: p.irm,
        lltv: p.lltv,
    })
}

pub async fn morpho_market_totals(
    node: &NodeClient,
    core: Address,
    id: B256,
) -> eyre::Result<MorphoMarketTotals> {
    let c = IMorpho::new(core, node.provider());
    let m = c.market(id).call().await.context("morpho market")?;
    Ok(MorphoMarketTotals {
        total_borrow_assets: U256::from(m.totalBorrowAssets),
        total_borrow_shares: U256::from(m.totalBorrowShares),
    })
}

pub async fn morpho_user_position(
    node: &NodeClient,
    core: Address,
    id: B256,
    user: Address,
) -> eyre::Result<MorphoUserPosition> {
    let c = IMorpho::new(core, node.provider());
    let p = c.position(id, user).call().await.context("morpho position")?;
    Ok(MorphoUserPosition {
        supply_shares: p.supplyShares,
        borrow_shares: U256::from(p.borrowShares),
        collateral: U256::from(p.collateral),
    })
}

pub async fn morpho_is_authorized(
    node: &NodeClient,
    core: Address,
    authorizer: Address,
    authorized: Address,
) -> eyre::Result<bool> {
    let c = IMorpho::new(core, node.provider());
    let v = c
        .isAuthorized(authorizer, authorized)
        .call()
        .await
        .context("morpho isAuthorized")?;
    Ok(v)
}

/// A market id resolves to usable params when the mapping is populated,
/// the loan side is the expected asset, and the collateral side matches
/// the route's token. Each failure carries its own reason.
pub fn morpho_params_issue(
    params: Option<&MorphoMarketParams>,
    loan_asset: Address,
    route_collateral: Address,
) -> Option<&'static str> {
    let Some(p) = params else {
        return Some("morpho market params could not be read");
    };
    if p.loan_token.is_zero() {
        return Some("morpho market id maps to an unpopulated market");
    }
    if p.loan_token != loan_asset {
        return Some("morpho market loan token differs from the configured loan asset");
    }
    if p.collateral_token != route_collateral {
        return Some("morpho market collateral token differs from the route's collateral");
    }
    None
}

/// Borrow shares to owed assets, rounding up against the borrower.
pub fn morpho_debt(user: &MorphoUserPosition, totals: &MorphoMarketTotals) -> Option<U256> {
    shares_to_assets_up(
        user.borrow_shares,
        totals.total_borrow_assets,
        totals.total_borrow_shares,
    )
}

pub async fn aave_position_view(
    node: &NodeClient,
    reserve: Option<AaveReserveTokens>,
    proxy: Address,
) -> VenuePosition {
    let (supplied, debt) = match reserve {
        Some(r) => {
            let supplied = node.erc20_balance_of(r.atoken, proxy).await.ok();
            // An atoken override without reserve discovery leaves the
            // debt token unset; the debt column degrades alone.
            let debt = if r.variable_debt_token.is_zero() {
                None
            } else {
                node.erc20_balance_of(r.variable_debt_token, proxy).await.ok()
            };
            (supplied, debt)
        }
        None => (None, None),
    };
    VenuePosition::Aave { supplied, debt }
}

pub async fn morpho_position_view(
    node: &NodeClient,
    core: Address,
    id: B256,
    proxy: Address,
) -> VenuePosition {
    let user = morpho_user_position(node, core, id, proxy).await.ok();
    let totals = morpho_market_totals(node, core, id).await.ok();
    let debt = match (&user, &totals) {
        (Some(u), Some(t)) => morpho_debt(u, t),
        _ => None,
    };
    VenuePosition::Morpho {
        collateral: user.map(|u| u.collateral),
        debt,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn a(byte: u8) -> Address {
        Address::repeat_byte(byte)
    }

    fn params(loan: Address, collateral: Address) -> MorphoMarketParams {
        MorphoMarketParams {
            loan_token: loan,
            collateral_token: collateral,
            oracle: a(0x33),
            irm: a(0x44),
            lltv: U256::from(860_000_000_000_000_000_u64),
        }
    }

    #[test]
    fn params_issue_names_the_mismatched_side() {
        let weth = a(0x01);
        let wsteth = a(0x02);
        assert_eq!(
            morpho_params_issue(Some(&params(weth, wsteth)), weth, wsteth),
            None
        );
        let collateral_issue =
            morpho_params_issue(Some(&params(weth, wsteth)), weth, a(0x03)).unwrap_or_default();
        assert!(collateral_issue.contains("collateral"));
        let loan_issue =
            morpho_params_issue(Some(&params(a(0x03), wsteth)), weth, wsteth).unwrap_or_default();
        assert!(loan_issue.contains("loan"));
        assert!(morpho_params_issue(None, weth, wsteth).is_some());
    }

    #[test]
    fn unpopulated_market_mapping_never_matches() {
        let empty = params(Address::ZERO, Address::ZERO);
        assert!(morpho_params_issue(Some(&empty), Address::ZERO, Address::ZERO).is_some());
    }

    #[test]
    fn debt_conversion_rounds_up() {
        let user = MorphoUserPosition {
            supply_shares: U256::ZERO,
            borrow_shares: U256::from(1_000_000_u64),
            collateral: U256::ZERO,
        };
        let totals = MorphoMarketTotals {
            total_borrow_assets: U256::from(2_000_000_u64),
            total_borrow_shares: U256::from(1_000_000_000_u64),
        };
        assert_eq!(morpho_debt(&user, &totals), Some(U256::from(1999_u64)));
    }

    #[test]
    fn venue_views_expose_their_debt() {
        let aave = VenuePosition::Aave {
            supplied: Some(U256::from(5_u64)),
            debt: Some(U256::from(9_u64)),
        };
        assert_eq!(aave.venue(), Venue::Aave);
        assert_eq!(aave.debt(), Some(U256::from(9_u64)));

        let morpho = VenuePosition::Morpho {
            collateral: None,
            debt: None,
        };
        assert_eq!(morpho.venue(), Venue::Morpho);
        assert_eq!(morpho.debt(), None);
    }
}
