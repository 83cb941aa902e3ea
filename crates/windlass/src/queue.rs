//! Staking withdrawal-queue tickets attached to positions.
//!
//! An adapter unwinding wstETH waits on Lido's withdrawal queue; one
//! unwinding weETH waits on ether.fi's request NFT. Settlement gating
//! differs on read failure by venue contract: Lido reports a full
//! status tuple and an unreadable ticket does not block, while ether.fi
//! exposes only `isFinalized`, so an unknown answer must block.

use crate::evm::NodeClient;
use alloy::primitives::{Address, U256};
use alloy::sol;
use tracing::debug;

sol! {
    #[sol(rpc)]
    contract ILidoWithdrawalQueue {
        struct WithdrawalRequestStatus {
            uint256 amountOfStETH;
            uint256 amountOfShares;
            address owner;
            uint256 timestamp;
            bool isFinalized;
            bool isClaimed;
        }
        function getWithdrawalStatus(uint256[] _requestIds)
            external view returns (WithdrawalRequestStatus[] statuses);
    }
}

sol! {
    #[sol(rpc)]
    contract IEtherFiWithdrawNft {
        function isFinalized(uint256 requestId) external view returns (bool);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueProvider {
    Lido,
    EtherFi,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LidoTicketStatus {
    pub steth_amount: U256,
    pub is_finalized: bool,
    pub is_claimed: bool,
}

impl LidoTicketStatus {
    pub fn ready(&self) -> bool {
        self.is_finalized && !self.is_claimed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueState {
    /// No ticket attached to the position.
    NotApplicable,
    /// `None` status means the queue could not be read.
    Lido { status: Option<LidoTicketStatus> },
    /// `None` means finality could not be read.
    EtherFi { finalized: Option<bool> },
}

impl QueueState {
    pub fn label(&self) -> &'static str {
        match self {
            Self::NotApplicable => "-",
            Self::Lido { status: None } | Self::EtherFi { finalized: None } => "unknown",
            Self::Lido {
                status: Some(status),
            } => {
                if status.is_claimed {
                    "claimed"
                } else if status.ready() {
                    "claimable"
                } else {
                    "pending finalization"
                }
            }
            Self::EtherFi {
                finalized: Some(true),
            } => "claimable",
            Self::EtherFi {
                finalized: Some(false),
            } => "pending finalization",
        }
    }

    /// The queue-side settlement blocker, when one applies.
    pub fn settlement_block(&self) -> Option<String> {
        match self {
            Self::NotApplicable => None,
            Self::Lido { status } => match status {
                Some(s) if !s.ready() => Some(self.label().to_owned()),
                // An unreadable Lido ticket does not block; the contract
                // will still refuse a genuinely unfinalized claim.
                _ => None,
            },
            Self::EtherFi { finalized } => match finalized {
                Some(true) => None,
                _ => Some(self.label().to_owned()),
            },
        }
    }
}

pub async fn lido_ticket_status(
    node: &NodeClient,
    queue: Address,
    ticket_id: U256,
) -> Option<LidoTicketStatus> {
    let c = ILidoWithdrawalQueue::new(queue, node.provider());
    match c.getWithdrawalStatus(vec![ticket_id]).call().await {
        Ok(statuses) => statuses.first().map(|s| LidoTicketStatus {
            steth_amount: s.amountOfStETH,
            is_finalized: s.isFinalized,
            is_claimed: s.isClaimed,
        }),
        Err(err) => {
            debug!(%err, %ticket_id, "lido withdrawal status unavailable");
            None
        }
    }
}

pub async fn etherfi_ticket_finalized(
    node: &NodeClient,
    nft: Address,
    ticket_id: U256,
) -> Option<bool> {
    let c = IEtherFiWithdrawNft::new(nft, node.provider());
    match c.isFinalized(ticket_id).call().await {
        Ok(v) => Some(v),
        Err(err) => {
            debug!(%err, %ticket_id, "ether.fi finality unavailable");
            None
        }
    }
}

/// Resolve the queue state for a position's reference id. A zero id
/// means the adapter holds no ticket.
pub async fn load_queue_state(
    node: &NodeClient,
    provider_kind: Option<QueueProvider>,
    ticket_id: U256,
    lido_queue: Option<Address>,
    etherfi_nft: Option<Address>,
) -> QueueState {
    let Some(kind) = provider_kind else {
        return QueueState::NotApplicable;
    };
    if ticket_id.is_zero() {
        return QueueState::NotApplicable;
    }
    match kind {
        QueueProvider::Lido => {
            let status = match lido_queue {
                Some(queue) => lido_ticket_status(node, queue, ticket_id).await,
                None => None,
            };
            QueueState::Lido { status }
        }
        QueueProvider::EtherFi => {
            let finalized = match etherfi_nft {
                Some(nft) => etherfi_ticket_finalized(node, nft, ticket_id).await,
                None => None,
            };
            QueueState::EtherFi { finalized }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lido(finalized: bool, claimed: bool) -> QueueState {
        QueueState::Lido {
            status: Some(LidoTicketStatus {
                steth_amount: U256::from(1_u64),
                is_finalized: finalized,
                is_claimed: claimed,
            }),
        }
    }

    #[test]
    fn lido_labels_cover_the_ticket_lifecycle() {
        assert_eq!(QueueState::NotApplicable.label(), "-");
        assert_eq!(lido(false, false).label(), "pending finalization");
        assert_eq!(lido(true, false).label(), "claimable");
        assert_eq!(lido(true, true).label(), "claimed");
        assert_eq!(QueueState::Lido { status: None }.label(), "unknown");
    }

    #[test]
    fn etherfi_labels_track_finality() {
        assert_eq!(
            QueueState::EtherFi {
                finalized: Some(true)
            }
            .label(),
            "claimable"
        );
        assert_eq!(
            QueueState::EtherFi {
                finalized: Some(false)
            }
            .label(),
            "pending finalization"
        );
        assert_eq!(QueueState::EtherFi { finalized: None }.label(), "unknown");
    }

    #[test]
    fn only_ready_lido_tickets_clear_settlement() {
        assert_eq!(lido(true, false).settlement_block(), None);
        assert!(lido(false, false).settlement_block().is_some());
        assert!(lido(true, true).settlement_block().is_some());
    }

    #[test]
    fn unreadable_lido_ticket_does_not_block() {
        assert_eq!(QueueState::Lido { status: None }.settlement_block(), None);
    }

    #[test]
    fn unreadable_etherfi_ticket_blocks() {
        assert!(QueueState::EtherFi { finalized: None }
            .settlement_block()
            .is_some());
        assert!(QueueState::EtherFi {
            finalized: Some(false)
        }
        .settlement_block()
        .is_some());
        assert_eq!(
            QueueState::EtherFi {
                finalized: Some(true)
            }
            .settlement_block(),
            None
        );
    }

    #[test]
    fn missing_ticket_never_blocks() {
        assert_eq!(QueueState::NotApplicable.settlement_block(), None);
        assert_eq!(QueueState::NotApplicable.label(), "-");
    }
}
