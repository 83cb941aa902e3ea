//! Leverage routes: which venue funds the loan and which token backs it.
//!
//! A route pins the adapter, flash-loan receiver, and collateral token
//! for one venue/collateral pairing. Resolution happens entirely from
//! config, before any RPC call, so a missing slot is reported as a
//! setup problem rather than a network one.

use crate::config::WindlassConfig;
use crate::errors::{require_configured, WindlassError};
use alloy::primitives::{Address, B256};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Venue {
    Aave,
    Morpho,
}

impl fmt::Display for Venue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Aave => write!(f, "aave"),
            Self::Morpho => write!(f, "morpho"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteKey {
    AaveWsteth,
    AaveWeeth,
    MorphoWsteth,
    MorphoWeeth,
}

impl RouteKey {
    pub const ALL: [Self; 4] = [
        Self::AaveWsteth,
        Self::AaveWeeth,
        Self::MorphoWsteth,
        Self::MorphoWeeth,
    ];

    pub fn venue(self) -> Venue {
        match self {
            Self::AaveWsteth | Self::AaveWeeth => Venue::Aave,
            Self::MorphoWsteth | Self::MorphoWeeth => Venue::Morpho,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::AaveWsteth => "aave-wsteth",
            Self::AaveWeeth => "aave-weeth",
            Self::MorphoWsteth => "morpho-wsteth",
            Self::MorphoWeeth => "morpho-weeth",
        }
    }
}

impl fmt::Display for RouteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RouteKey {
    type Err = WindlassError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| {
                let known: Vec<&str> = Self::ALL.iter().map(|k| k.as_str()).collect();
                WindlassError::InvalidInput(format!(
                    "unknown route '{s}' (expected one of: {})",
                    known.join(", ")
                ))
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MorphoRouteParams {
    pub core: Address,
    pub market_id: B256,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteSpec {
    pub key: RouteKey,
    pub venue: Venue,
    pub adapter: Address,
    pub receiver: Address,
    pub collateral_token: Address,
    pub collateral_symbol: &'static str,
    /// Present exactly when `venue == Venue::Morpho`.
    pub morpho: Option<MorphoRouteParams>,
}

pub fn resolve_route(cfg: &WindlassConfig, key: RouteKey) -> Result<RouteSpec, WindlassError> {
    let venue = key.venue();

    let (adapter, adapter_slot) = match key {
        RouteKey::AaveWsteth | RouteKey::MorphoWsteth => {
            (cfg.contracts.wsteth_adapter, "contracts.wsteth_adapter")
        }
        RouteKey::AaveWeeth | RouteKey::MorphoWeeth => {
            (cfg.contracts.weeth_adapter, "contracts.weeth_adapter")
        }
    };
    let (receiver, receiver_slot) = match venue {
        Venue::Aave => (cfg.contracts.aave_receiver, "contracts.aave_receiver"),
        Venue::Morpho => (cfg.contracts.morpho_receiver, "contracts.morpho_receiver"),
    };
    let (collateral, collateral_slot, collateral_symbol) = match key {
        RouteKey::AaveWsteth | RouteKey::MorphoWsteth => {
            (cfg.tokens.wsteth, "tokens.wsteth", "wstETH")
        }
        RouteKey::AaveWeeth | RouteKey::MorphoWeeth => (cfg.tokens.weeth, "tokens.weeth", "weETH"),
    };

    let morpho = match venue {
        Venue::Aave => None,
        Venue::Morpho => {
            let core = require_configured(cfg.contracts.morpho, "contracts.morpho")?;
            let (id, id_slot) = match key {
                RouteKey::MorphoWsteth => (cfg.markets.morpho_wsteth_id, "markets.morpho_wsteth_id"),
                _ => (cfg.markets.morpho_weeth_id, "markets.morpho_weeth_id"),
            };
            Some(MorphoRouteParams {
                core,
                market_id: require_configured(id, id_slot)?,
            })
        }
    };

    Ok(RouteSpec {
        key,
        venue,
        adapter: require_configured(adapter, adapter_slot)?,
        receiver: require_configured(receiver, receiver_slot)?,
        collateral_token: require_configured(collateral, collateral_slot)?,
        collateral_symbol,
        morpho,
    })
}
