//! Unsigned transaction assembly for the `prepare` commands.
//!
//! Every builder returns a [`TxEnvelope`]: target, calldata, and a
//! one-line label, serialized as JSON for an external signer. Nothing
//! here signs or broadcasts, and no envelope carries ether.

use crate::amount::short_address;
use crate::evm::{NodeClient, IERC20};
use crate::positions::ILeverageMarket;
use crate::vault::IYieldVault;
use crate::venues::{IMorpho, MorphoMarketParams};
use alloy::primitives::{Address, Bytes, B256, U256};
use alloy::providers::Provider as _;
use alloy::sol_types::{SolCall as _, SolValue as _};
use eyre::Context as _;
use serde::Serialize;
use tracing::warn;

/// A call for an external signer: `to` and `data` are the contract
/// invocation, `value` is always zero.
#[derive(Debug, Clone, Serialize)]
pub struct TxEnvelope {
    pub label: String,
    pub to: Address,
    pub data: Bytes,
    pub value: U256,
}

fn envelope(label: String, to: Address, calldata: Vec<u8>) -> TxEnvelope {
    TxEnvelope {
        label,
        to,
        data: calldata.into(),
        value: U256::ZERO,
    }
}

/// Let the route receiver pull the wallet's collateral reserve tokens.
pub fn approve_collateral_tx(
    reserve_token: Address,
    spender: Address,
    amount: U256,
    amount_display: &str,
) -> TxEnvelope {
    let calldata = IERC20::approveCall {
        spender,
        value: amount,
    }
    .abi_encode();
    envelope(
        format!(
            "approve {amount_display} of reserve token {} for {}",
            short_address(reserve_token),
            short_address(spender)
        ),
        reserve_token,
        calldata,
    )
}

pub fn approve_vault_asset_tx(
    asset: Address,
    vault: Address,
    amount: U256,
    amount_display: &str,
) -> TxEnvelope {
    let calldata = IERC20::approveCall {
        spender: vault,
        value: amount,
    }
    .abi_encode();
    envelope(
        format!("approve {amount_display} for the vault"),
        asset,
        calldata,
    )
}

pub fn set_authorization_tx(morpho_core: Address, authorized: Address, enable: bool) -> TxEnvelope {
    let calldata = IMorpho::setAuthorizationCall {
        authorized,
        newIsAuthorized: enable,
    }
    .abi_encode();
    let label = if enable {
        format!(
            "authorize {} to manage morpho positions",
            short_address(authorized)
        )
    } else {
        format!(
            "revoke morpho position management from {}",
            short_address(authorized)
        )
    };
    envelope(label, morpho_core, calldata)
}

/// `abi.encode(collateralAsset, reserveToken, collateralAmount)`, the
/// shape the Aave receiver expects in its flash-loan callback.
pub fn aave_callback_data(
    collateral_asset: Address,
    reserve_token: Address,
    collateral_amount: U256,
) -> Bytes {
    (collateral_asset, reserve_token, collateral_amount)
        .abi_encode()
        .into()
}

/// `abi.encode(marketParams, collateralAmount)` for the Morpho receiver.
pub fn morpho_callback_data(params: &MorphoMarketParams, collateral_amount: U256) -> Bytes {
    let market = (
        params.loan_token,
        params.collateral_token,
        params.oracle,
        params.irm,
        params.lltv,
    );
    (market, collateral_amount).abi_encode().into()
}

#[derive(Debug, Clone)]
pub struct OpenRequest<'a> {
    pub market: Address,
    pub principal: U256,
    pub adapter: Address,
    pub receiver: Address,
    pub collateral_amount: U256,
    pub callback_data: Bytes,
    pub route_name: &'a str,
    pub principal_display: &'a str,
    pub collateral_display: &'a str,
}

pub fn open_position_tx(req: &OpenRequest<'_>) -> TxEnvelope {
    let calldata = ILeverageMarket::openPositionCall {
        principal: req.principal,
        adapter: req.adapter,
        receiver: req.receiver,
        collateralAmount: req.collateral_amount,
        callbackData: req.callback_data.clone(),
    }
    .abi_encode();
    envelope(
        format!(
            "open a {} position borrowing {} against {} collateral",
            req.route_name, req.principal_display, req.collateral_display
        ),
        req.market,
        calldata,
    )
}

pub fn settle_position_tx(market: Address, token_id: u64) -> TxEnvelope {
    let calldata = ILeverageMarket::settleAndRepayCall {
        tokenId: U256::from(token_id),
        to: Address::ZERO,
        data: Bytes::new(),
    }
    .abi_encode();
    envelope(
        format!("settle position #{token_id} and repay its debt"),
        market,
        calldata,
    )
}

pub fn vault_deposit_tx(
    wallet: Address,
    vault: Address,
    amount: U256,
    amount_display: &str,
) -> TxEnvelope {
    let calldata = IYieldVault::depositCall {
        assets: amount,
        receiver: wallet,
    }
    .abi_encode();
    envelope(
        format!("deposit {amount_display} into the vault"),
        vault,
        calldata,
    )
}

pub fn vault_withdraw_tx(
    wallet: Address,
    vault: Address,
    amount: U256,
    amount_display: &str,
) -> TxEnvelope {
    let calldata = IYieldVault::withdrawCall {
        assets: amount,
        receiver: wallet,
        owner: wallet,
    }
    .abi_encode();
    envelope(
        format!("withdraw {amount_display} from the vault"),
        vault,
        calldata,
    )
}

/// Token ids minted by `tx`, read from the market's open events in the
/// receipt. Logs emitted by other contracts are ignored.
pub async fn opened_token_ids_from_receipt(
    node: &NodeClient,
    market: Address,
    tx: B256,
) -> eyre::Result<Vec<u64>> {
    let receipt = node
        .provider()
        .get_transaction_receipt(tx)
        .await
        .context("get transaction receipt")?;
    let Some(receipt) = receipt else {
        eyre::bail!("transaction {tx} is not known to this rpc endpoint");
    };
    if !receipt.status() {
        eyre::bail!("transaction {tx} reverted");
    }

    let mut ids = Vec::new();
    for log in receipt.inner.logs() {
        if log.address() != market {
            continue;
        }
        let Ok(decoded) = log.log_decode::<ILeverageMarket::PositionOpened>() else {
            continue;
        };
        let token_id = decoded.inner.data.tokenId;
        match u64::try_from(token_id) {
            Ok(id) => ids.push(id),
            Err(_) => warn!(%token_id, "skipping oversized token id in receipt"),
        }
    }
    Ok(ids)
}
