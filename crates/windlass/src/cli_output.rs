//! JSON documents written to stdout, one per command.
//!
//! Amounts render as display strings (decimal, truncated, symbol
//! suffixed) and unavailable reads render as the literal
//! "not available"; zero is never substituted for a missing value.

use crate::amount::{format_amount_dp, format_timestamp_utc};
use crate::blocktime::WindowStart;
use crate::errors::ErrorReport;
use crate::evm::BlockRef;
use crate::gate::assess_settle;
use crate::positions::PositionSnapshot;
use crate::queue::QueueState;
use crate::resolver::{PositionsReport, TokenDisplay, VaultOverview};
use crate::scan::ScanOutcome;
use crate::txbuild::TxEnvelope;
use crate::vault::TrailingApr;
use crate::wad::{format_bps_percent, format_percent_wad, format_percent_wad_unsigned, NOT_AVAILABLE};
use alloy::primitives::{Address, U256};
use eyre::Context as _;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;

const DISPLAY_FRAC_DIGITS: usize = 6;

fn write_doc(out: &mut impl std::io::Write, doc: &Value) -> eyre::Result<()> {
    let s = serde_json::to_string_pretty(doc).context("serialize output")?;
    writeln!(out, "{s}").context("write output")?;
    Ok(())
}

/// "1.25 wstETH" or "not available".
pub fn amount_display(value: Option<U256>, decimals: u8, symbol: &str) -> String {
    let Some(v) = value else {
        return NOT_AVAILABLE.to_owned();
    };
    let figure =
        format_amount_dp(v, decimals, DISPLAY_FRAC_DIGITS).unwrap_or_else(|_| v.to_string());
    if symbol.is_empty() {
        figure
    } else {
        format!("{figure} {symbol}")
    }
}

fn block_json(block: BlockRef) -> Value {
    json!({
      "number": block.number,
      "timestamp": block.timestamp,
      "time": format_timestamp_utc(block.timestamp),
    })
}

fn token_id_json(id: U256) -> Value {
    u64::try_from(id).map_or_else(|_| json!(id.to_string()), |n| json!(n))
}

/// Symbol and decimals for an asset, from the report's token metadata.
/// Unknown assets display as their shortened address with 18 decimals.
fn token_display(
    tokens: &BTreeMap<Address, TokenDisplay>,
    token: Option<Address>,
) -> (String, u8) {
    match token {
        Some(addr) => tokens.get(&addr).map_or_else(
            || (crate::amount::short_address(addr), 18),
            |t| (t.symbol.clone(), t.decimals),
        ),
        None => (String::new(), 18),
    }
}

fn queue_provider_json(queue: &QueueState) -> Value {
    match queue {
        QueueState::NotApplicable => Value::Null,
        QueueState::Lido { .. } => json!("lido"),
        QueueState::EtherFi { .. } => json!("etherfi"),
    }
}

fn position_json(snap: &PositionSnapshot, wallet: Address, tokens: &BTreeMap<Address, TokenDisplay>) -> Value {
    let view = snap.adapter_view;
    let (loan_symbol, loan_decimals) = token_display(tokens, view.map(|v| v.loan_asset));
    let (collateral_symbol, collateral_decimals) =
        token_display(tokens, view.map(|v| v.collateral_asset));

    let gate = assess_settle(
        snap.owner_matches(wallet),
        snap.is_open(),
        snap.queue.settlement_block(),
    );
    let blockers: Vec<String> = gate.blockers.iter().map(ToString::to_string).collect();

    let reference_id = view
        .map(|v| v.reference_id)
        .filter(|id| !id.is_zero())
        .map_or(Value::Null, token_id_json);

    json!({
      "token_id": token_id_json(snap.token_id),
      "market_state": snap.record.map_or_else(|| NOT_AVAILABLE.to_owned(), |r| r.state.to_string()),
      "adapter_status": view.map_or_else(|| NOT_AVAILABLE.to_owned(), |v| v.status.to_string()),
      "owner": snap.current_owner.map(|a| a.to_string()),
      "proxy": view.map(|v| v.proxy.to_string()),
      "principal": amount_display(view.map(|v| v.principal), loan_decimals, &loan_symbol),
      "collateral": amount_display(
          view.map(|v| v.collateral_amount),
          collateral_decimals,
          &collateral_symbol
      ),
      "debt_quote": amount_display(snap.quoted_debt, loan_decimals, &loan_symbol),
      "expected_unlock": format_timestamp_utc(snap.unlock_time()),
      "reference_id": reference_id,
      "queue_provider": queue_provider_json(&snap.queue),
      "queue_status": snap.queue.label(),
      "venue": snap.venue.as_ref().map(|v| v.venue().to_string()),
      "venue_collateral": snap
          .venue
          .as_ref()
          .map(|v| amount_display(v.collateral(), collateral_decimals, &collateral_symbol)),
      "venue_debt": snap
          .venue
          .as_ref()
          .map(|v| amount_display(v.debt(), loan_decimals, &loan_symbol)),
      "tracked": snap.tracked,
      "can_settle": gate.can_settle,
      "blockers": blockers,
    })
}

pub fn print_positions(out: &mut impl std::io::Write, r: &PositionsReport) -> eyre::Result<()> {
    let (loan_symbol, loan_decimals) = token_display(&r.tokens, r.loan_token);
    let positions: Vec<Value> = r
        .positions
        .iter()
        .map(|snap| position_json(snap, r.wallet, &r.tokens))
        .collect();

    write_doc(
        out,
        &json!({
          "block": block_json(r.block),
          "wallet": r.wallet.to_string(),
          "market": {
            "available_liquidity": amount_display(
                r.summary.available_liquidity, loan_decimals, &loan_symbol),
            "total_principal_active": amount_display(
                r.summary.total_principal_active, loan_decimals, &loan_symbol),
            "base_rate": format_bps_percent(r.summary.base_rate_bps),
          },
          "scan": {
            "complete": r.scan_note.is_none(),
            "note": r.scan_note,
          },
          "positions": positions,
        }),
    )
}

pub fn print_vault(out: &mut impl std::io::Write, o: &VaultOverview) -> eyre::Result<()> {
    let asset_decimals = o.asset_decimals.or(o.vault_decimals).unwrap_or(18);
    let share_decimals = o.vault_decimals.unwrap_or(18);
    let symbol = o.asset_symbol.as_str();

    let (trailing_apr, trailing_note) = match o.trailing {
        TrailingApr::Available(wad) => (format_percent_wad(Some(wad)), Value::Null),
        TrailingApr::Unavailable(reason) => (NOT_AVAILABLE.to_owned(), json!(reason)),
    };

    write_doc(
        out,
        &json!({
          "vault": o.vault.to_string(),
          "block": block_json(o.block),
          "asset": {
            "address": o.asset.map(|a| a.to_string()),
            "symbol": symbol,
            "decimals": o.asset_decimals,
          },
          "total_assets": amount_display(o.total_assets, asset_decimals, symbol),
          "price_per_share": amount_display(o.price_per_share, asset_decimals, ""),
          "wallet": {
            "share_balance": amount_display(o.wallet_shares, share_decimals, "shares"),
            "holdings": amount_display(o.wallet_share_value, asset_decimals, symbol),
            "max_withdraw": amount_display(o.max_withdraw, asset_decimals, symbol),
            "asset_balance": amount_display(o.wallet_asset_balance, asset_decimals, symbol),
            "vault_allowance": amount_display(o.vault_allowance, asset_decimals, symbol),
          },
          "yield": {
            "estimated_apr": format_percent_wad_unsigned(o.estimated_apr),
            "blend": {
              "strategy_apr": format_percent_wad_unsigned(o.blend.strategy_apr_wad),
              "strategy_allocation": amount_display(
                  o.blend.strategy_allocation, asset_decimals, symbol),
              "market_base_rate": format_bps_percent(o.blend.market_rate_bps),
              "active_principal": amount_display(
                  o.blend.total_principal_active, asset_decimals, symbol),
            },
            "trailing_7d_apr": trailing_apr,
            "trailing_note": trailing_note,
          },
        }),
    )
}

pub fn print_scan(
    out: &mut impl std::io::Write,
    wallet: Address,
    latest: BlockRef,
    outcome: &ScanOutcome,
) -> eyre::Result<()> {
    let ids: Vec<Value> = outcome.token_ids.iter().copied().map(token_id_json).collect();
    write_doc(
        out,
        &json!({
          "wallet": wallet.to_string(),
          "block": block_json(latest),
          "expected": outcome.expected,
          "found": outcome.token_ids.len(),
          "complete": outcome.complete,
          "token_ids": ids,
          "note": outcome.note,
        }),
    )
}

pub fn print_block_at(
    out: &mut impl std::io::Write,
    window_secs: u64,
    latest: BlockRef,
    start: &WindowStart,
) -> eyre::Result<()> {
    let doc = match start {
        WindowStart::Found(located) => json!({
          "window_seconds": window_secs,
          "latest": block_json(latest),
          "located": block_json(located.block),
          "probes": located.probes,
        }),
        WindowStart::InsufficientHistory => json!({
          "window_seconds": window_secs,
          "latest": block_json(latest),
          "located": Value::Null,
          "note": "chain history is shorter than the window",
        }),
    };
    write_doc(out, &doc)
}

pub fn print_tracked_ids(out: &mut impl std::io::Write, ids: &[u64]) -> eyre::Result<()> {
    write_doc(
        out,
        &json!({
          "count": ids.len(),
          "token_ids": ids,
        }),
    )
}

/// Sizing derived from the wallet's current venue position, reported
/// next to the envelopes and never applied automatically.
#[derive(Debug, Clone, Serialize)]
pub struct SuggestedSizing {
    pub principal: String,
    pub collateral: String,
}

pub fn print_prepare(
    out: &mut impl std::io::Write,
    transactions: &[TxEnvelope],
    notes: &[String],
    suggested: Option<&SuggestedSizing>,
) -> eyre::Result<()> {
    write_doc(
        out,
        &json!({
          "transactions": transactions,
          "notes": notes,
          "suggested": suggested,
        }),
    )
}

/// The failure document: a single `error` object carrying the stable
/// machine code, so stdout stays one JSON document per run.
pub fn print_error(out: &mut impl std::io::Write, report: &ErrorReport) -> eyre::Result<()> {
    write_doc(out, &json!({ "error": report }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::positions::{AdapterStatus, MarketState};
    use crate::resolver::MarketSummary;
    use crate::vault::BlendInputs;
    use alloy::primitives::address;

    fn render<F>(f: F) -> eyre::Result<Value>
    where
        F: FnOnce(&mut Vec<u8>) -> eyre::Result<()>,
    {
        let mut buf = Vec::new();
        f(&mut buf)?;
        let doc: Value = serde_json::from_slice(&buf).context("parse rendered json")?;
        Ok(doc)
    }

    fn block() -> BlockRef {
        BlockRef {
            number: 19_000_000,
            timestamp: 1_700_000_000,
        }
    }

    #[test]
    fn amounts_render_with_symbol_or_not_available() {
        let one_and_half = U256::from(1_500_000_000_000_000_000_u128);
        assert_eq!(amount_display(Some(one_and_half), 18, "WETH"), "1.5 WETH");
        assert_eq!(amount_display(None, 18, "WETH"), "not available");
        assert_eq!(amount_display(Some(U256::ZERO), 18, "WETH"), "0 WETH");
    }

    #[test]
    fn display_precision_truncates_rather_than_rounds() {
        let v = U256::from(1_999_999_999_500_000_000_u128);
        assert_eq!(amount_display(Some(v), 18, ""), "1.999999");
    }

    #[test]
    fn positions_report_renders_one_document() -> eyre::Result<()> {
        let weth = address!("c02aaa39b223fe8d0a0e5c4f27ead9083c756cc2");
        let wallet = Address::repeat_byte(0x11);
        let mut tokens = BTreeMap::new();
        tokens.insert(
            weth,
            TokenDisplay {
                symbol: "WETH".to_owned(),
                decimals: 18,
            },
        );

        let snap = PositionSnapshot {
            token_id: U256::from(7),
            record: None,
            adapter_view: None,
            current_owner: Some(wallet),
            quoted_debt: None,
            venue: None,
            queue: QueueState::NotApplicable,
            tracked: true,
        };
        let report = PositionsReport {
            block: block(),
            wallet,
            loan_token: Some(weth),
            summary: MarketSummary {
                available_liquidity: Some(U256::from(2_000_000_000_000_000_000_u128)),
                total_principal_active: None,
                base_rate_bps: Some(U256::from(250_u64)),
            },
            positions: vec![snap],
            tokens,
            scan_note: Some("scan stopped at genesis".to_owned()),
        };

        let doc = render(|buf| print_positions(buf, &report))?;
        assert_eq!(doc["market"]["available_liquidity"], "2 WETH");
        assert_eq!(doc["market"]["total_principal_active"], "not available");
        assert_eq!(doc["market"]["base_rate"], "2.50%");
        assert_eq!(doc["scan"]["complete"], false);
        assert_eq!(doc["positions"][0]["token_id"], 7);
        assert_eq!(doc["positions"][0]["market_state"], "not available");
        assert_eq!(doc["positions"][0]["tracked"], true);
        assert_eq!(doc["positions"][0]["can_settle"], false);
        Ok(())
    }

    #[test]
    fn settle_gate_reflects_queue_and_ownership() {
        let wallet = Address::repeat_byte(0x11);
        let snap = PositionSnapshot {
            token_id: U256::from(3),
            record: Some(crate::positions::MarketPositionRecord {
                owner: wallet,
                adapter: Address::repeat_byte(0x22),
                receiver: Address::repeat_byte(0x33),
                principal: U256::from(10),
                collateral_amount: U256::from(20),
                unlock_time: 0,
                state: MarketState::Active,
                opened_at: 0,
            }),
            adapter_view: Some(crate::positions::AdapterPositionView {
                owner: wallet,
                proxy: Address::repeat_byte(0x44),
                loan_asset: Address::repeat_byte(0x55),
                collateral_asset: Address::repeat_byte(0x66),
                principal: U256::from(10),
                collateral_amount: U256::from(20),
                expected_unlock_time: 1_700_000_100,
                reference_id: U256::from(9),
                status: AdapterStatus::Open,
            }),
            current_owner: Some(wallet),
            quoted_debt: Some(U256::from(11)),
            venue: None,
            queue: QueueState::EtherFi {
                finalized: Some(false),
            },
            tracked: false,
        };
        let doc = position_json(&snap, wallet, &BTreeMap::new());
        assert_eq!(doc["can_settle"], false);
        assert_eq!(doc["queue_provider"], "etherfi");
        assert_eq!(doc["queue_status"], "pending finalization");
        assert_eq!(doc["reference_id"], 9);
        assert_eq!(doc["expected_unlock"], format_timestamp_utc(1_700_000_100));
    }

    #[test]
    fn vault_overview_reports_blend_and_trailing_reason() -> eyre::Result<()> {
        let overview = VaultOverview {
            vault: Address::repeat_byte(0x0E),
            block: block(),
            asset: Some(Address::repeat_byte(0x0F)),
            asset_symbol: "WETH".to_owned(),
            asset_decimals: Some(18),
            vault_decimals: Some(18),
            price_per_share: Some(U256::from(1_020_000_000_000_000_000_u128)),
            total_assets: Some(U256::from(5_000_000_000_000_000_000_u128)),
            wallet_shares: None,
            wallet_share_value: None,
            max_withdraw: None,
            wallet_asset_balance: None,
            vault_allowance: None,
            blend: BlendInputs::default(),
            estimated_apr: None,
            trailing: TrailingApr::Unavailable("vault has not been live for 7 days"),
        };
        let doc = render(|buf| print_vault(buf, &overview))?;
        assert_eq!(doc["total_assets"], "5 WETH");
        assert_eq!(doc["price_per_share"], "1.02");
        assert_eq!(doc["wallet"]["share_balance"], "not available");
        assert_eq!(doc["yield"]["estimated_apr"], "not available");
        assert_eq!(doc["yield"]["trailing_7d_apr"], "not available");
        assert_eq!(
            doc["yield"]["trailing_note"],
            "vault has not been live for 7 days"
        );
        Ok(())
    }

    #[test]
    fn prepare_output_carries_envelopes_and_suggestions() -> eyre::Result<()> {
        let envelope = crate::txbuild::approve_collateral_tx(
            Address::repeat_byte(0xA1),
            Address::repeat_byte(0xA2),
            U256::from(5),
            "5 aToken",
        );
        let suggested = SuggestedSizing {
            principal: "2 WETH".to_owned(),
            collateral: "1.5 wstETH".to_owned(),
        };
        let notes = vec!["principal capped to available liquidity".to_owned()];
        let doc = render(|buf| print_prepare(buf, &[envelope], &notes, Some(&suggested)))?;
        assert!(doc["transactions"][0]["label"]
            .as_str()
            .is_some_and(|s| s.contains("approve")));
        assert!(doc["transactions"][0]["data"]
            .as_str()
            .is_some_and(|s| s.starts_with("0x095ea7b3")));
        assert_eq!(doc["transactions"][0]["value"], "0x0");
        assert_eq!(doc["notes"][0], "principal capped to available liquidity");
        assert_eq!(doc["suggested"]["principal"], "2 WETH");
        Ok(())
    }

    #[test]
    fn scan_and_block_at_render_block_context() -> eyre::Result<()> {
        let outcome = ScanOutcome {
            token_ids: vec![U256::from(5), U256::from(2)],
            expected: 3,
            complete: false,
            note: Some("reached genesis with 2 of 3".to_owned()),
        };
        let doc = render(|buf| print_scan(buf, Address::repeat_byte(0x11), block(), &outcome))?;
        assert_eq!(doc["expected"], 3);
        assert_eq!(doc["found"], 2);
        assert_eq!(doc["complete"], false);
        assert_eq!(doc["token_ids"][0], 5);

        let start = WindowStart::InsufficientHistory;
        let doc = render(|buf| print_block_at(buf, 604_800, block(), &start))?;
        assert_eq!(doc["located"], Value::Null);
        assert!(doc["note"].as_str().is_some_and(|s| s.contains("shorter")));
        Ok(())
    }
}
