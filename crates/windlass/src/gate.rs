//! Preconditions for opening and settling positions.
//!
//! Gating is advisory: the chain enforces the real rules, this module
//! predicts them so a transaction is only suggested when it can land.
//! Blockers carry a fixed priority so that when several apply the user
//! sees the structural problem (no liquidity) before the fixable one
//! (a missing approval).

use alloy::primitives::{Address, U256};
use std::fmt;

const SUGGESTED_COLLATERAL_BPS: u64 = 9_990;

/// Why an open or settle cannot proceed, highest priority first.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum BlockingReason {
    NoLiquidity,
    MissingCollateralApproval { token: Address, spender: Address },
    MissingAuthorization { manager: Address },
    UnresolvedRouteParams(String),
    QueueNotFinalized(String),
}

impl fmt::Display for BlockingReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoLiquidity => write!(f, "market has no available liquidity"),
            Self::MissingCollateralApproval { token, spender } => write!(
                f,
                "collateral token {token} needs approval for receiver {spender}"
            ),
            Self::MissingAuthorization { manager } => {
                write!(f, "morpho authorization for receiver {manager} not granted")
            }
            Self::UnresolvedRouteParams(what) => {
                write!(f, "route parameters unresolved: {what}")
            }
            Self::QueueNotFinalized(state) => {
                write!(f, "withdrawal queue ticket not ready: {state}")
            }
        }
    }
}

/// Venue-side facts gathered before gating. `None` means the read or
/// discovery failed; that is a distinct blocker from a negative answer.
#[derive(Debug, Clone)]
pub enum VenueConditions {
    Aave {
        /// Interest-bearing collateral token, once reserve discovery ran.
        atoken: Option<Address>,
        /// `allowance(wallet, receiver)` on that token.
        allowance: Option<U256>,
        receiver: Address,
    },
    Morpho {
        /// Why the market params failed to load or match, when they did.
        params_issue: Option<&'static str>,
        /// `isAuthorized(wallet, receiver)`.
        authorized: Option<bool>,
        receiver: Address,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenAssessment {
    pub blockers: Vec<BlockingReason>,
    pub effective_principal: U256,
    /// The requested principal exceeded liquidity and was reduced.
    pub capped: bool,
}

impl OpenAssessment {
    pub fn is_blocked(&self) -> bool {
        !self.blockers.is_empty()
    }
}

/// Cap the principal at what the market can fund.
pub fn effective_principal(requested: U256, available: U256) -> U256 {
    requested.min(available)
}

/// Suggest 99.9% of the wallet balance as collateral.
pub fn suggested_collateral(balance: U256) -> U256 {
    balance
        .checked_mul(U256::from(SUGGESTED_COLLATERAL_BPS))
        .map_or(balance, |scaled| scaled / U256::from(10_000_u64))
}

pub fn assess_open(
    requested_principal: U256,
    available_liquidity: U256,
    collateral_amount: U256,
    venue: &VenueConditions,
) -> OpenAssessment {
    let mut blockers: Vec<BlockingReason> = vec![];

    if available_liquidity.is_zero() {
        blockers.push(BlockingReason::NoLiquidity);
    }

    match venue {
        VenueConditions::Aave {
            atoken,
            allowance,
            receiver,
        } => match (atoken, allowance) {
            (Some(token), Some(allowance)) => {
                if !collateral_amount.is_zero() && *allowance < collateral_amount {
                    blockers.push(BlockingReason::MissingCollateralApproval {
                        token: *token,
                        spender: *receiver,
                    });
                }
            }
            _ => blockers.push(BlockingReason::UnresolvedRouteParams(
                "aave collateral reserve token".to_owned(),
            )),
        },
        VenueConditions::Morpho {
            params_issue,
            authorized,
            receiver,
        } => {
            if let Some(issue) = params_issue {
                blockers.push(BlockingReason::UnresolvedRouteParams((*issue).to_owned()));
            }
            match authorized {
                Some(true) => {}
                Some(false) => blockers.push(BlockingReason::MissingAuthorization {
                    manager: *receiver,
                }),
                None => blockers.push(BlockingReason::UnresolvedRouteParams(
                    "morpho authorization state".to_owned(),
                )),
            }
        }
    }

    blockers.sort();

    let capped = !requested_principal.is_zero()
        && !available_liquidity.is_zero()
        && requested_principal > available_liquidity;
    OpenAssessment {
        blockers,
        effective_principal: effective_principal(requested_principal, available_liquidity),
        capped,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettleAssessment {
    pub can_settle: bool,
    pub blockers: Vec<BlockingReason>,
}

/// A position settles only when the caller still owns it, it is open,
/// and no withdrawal-queue ticket is pending finalization.
pub fn assess_settle(
    owner_matches: bool,
    is_open: bool,
    queue_block: Option<String>,
) -> SettleAssessment {
    let mut blockers: Vec<BlockingReason> = vec![];
    if let Some(state) = queue_block {
        blockers.push(BlockingReason::QueueNotFinalized(state));
    }
    SettleAssessment {
        can_settle: owner_matches && is_open && blockers.is_empty(),
        blockers,
    }
}
