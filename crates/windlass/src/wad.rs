//! Integer fixed-point math for rates and share accounting.
//!
//! Ratios are WAD-scaled (10^18). Conversions round UP when the result is
//! owed to the protocol (borrow assets) and truncate when it flows to the
//! user, matching the on-chain accounting. Missing inputs stay `None` all
//! the way to rendering; zero is a valid rate and never a placeholder.

use alloy::primitives::{I256, U256};

pub const WAD: U256 = U256::from_limbs([1_000_000_000_000_000_000, 0, 0, 0]);
const BPS_TO_WAD_SCALE: U256 = U256::from_limbs([100_000_000_000_000, 0, 0, 0]);
pub const SECONDS_PER_YEAR: u64 = 31_536_000;

// Virtual offsets used by the share-accounted lending venue so conversion
// stays defined at zero utilization.
const MORPHO_VIRTUAL_SHARES: U256 = U256::from_limbs([1_000_000, 0, 0, 0]);
const MORPHO_VIRTUAL_ASSETS: U256 = U256::from_limbs([1, 0, 0, 0]);

pub const NOT_AVAILABLE: &str = "not available";

/// Ceiling division. `None` only when the denominator is zero.
pub fn div_up(n: U256, d: U256) -> Option<U256> {
    if d.is_zero() {
        return None;
    }
    if n.is_zero() {
        return Some(U256::ZERO);
    }
    Some((n - U256::from(1_u64)) / d + U256::from(1_u64))
}

/// Basis points to WAD (1 bps = 10^14).
pub fn bps_to_wad(bps: U256) -> Option<U256> {
    bps.checked_mul(BPS_TO_WAD_SCALE)
}

/// Borrow shares to an asset amount, rounding up, with the venue's virtual
/// offsets applied to both totals.
pub fn shares_to_assets_up(shares: U256, total_assets: U256, total_shares: U256) -> Option<U256> {
    let numerator = shares.checked_mul(total_assets.checked_add(MORPHO_VIRTUAL_ASSETS)?)?;
    let denominator = total_shares.checked_add(MORPHO_VIRTUAL_SHARES)?;
    div_up(numerator, denominator)
}

/// Annualize the price-per-share return over a trailing window.
/// `None` when the historical PPS is zero (never divided into) or the
/// window is empty.
pub fn annualized_apr_wad(
    current_pps: U256,
    historical_pps: U256,
    window_seconds: u64,
) -> Option<I256> {
    if historical_pps.is_zero() || window_seconds == 0 {
        return None;
    }
    let cur = I256::try_from(current_pps).ok()?;
    let hist = I256::try_from(historical_pps).ok()?;
    let period_return = cur
        .checked_sub(hist)?
        .checked_mul(I256::from_raw(WAD))?
        .checked_div(hist)?;
    period_return
        .checked_mul(I256::try_from(U256::from(SECONDS_PER_YEAR)).ok()?)?
        .checked_div(I256::try_from(U256::from(window_seconds)).ok()?)
}

/// Capital-weighted APR blend: the strategy APR weighted by its allocation
/// plus the base rate weighted by active principal. `None` when either
/// input is missing upstream or both weights are zero.
pub fn blend_weighted_apr(
    strategy_apr_wad: U256,
    strategy_allocation: U256,
    base_rate_wad: U256,
    total_principal_active: U256,
) -> Option<U256> {
    let total_weight = strategy_allocation.checked_add(total_principal_active)?;
    if total_weight.is_zero() {
        return None;
    }
    let weighted = strategy_apr_wad
        .checked_mul(strategy_allocation)?
        .checked_add(base_rate_wad.checked_mul(total_principal_active)?)?;
    Some(weighted / total_weight)
}

fn low_two_digits(v: U256) -> u64 {
    u64::try_from(v % U256::from(100_u64)).unwrap_or_default()
}

/// Render a WAD ratio as a signed percentage with exactly two fractional
/// digits. `None` renders as "not available", never as zero.
pub fn format_percent_wad(apr_wad: Option<I256>) -> String {
    let Some(wad) = apr_wad else {
        return NOT_AVAILABLE.to_owned();
    };
    let sign = if wad.is_negative() { "-" } else { "" };
    let Some(scaled) = wad.unsigned_abs().checked_mul(U256::from(10_000_u64)) else {
        return NOT_AVAILABLE.to_owned();
    };
    let hundredths = scaled / WAD;
    let whole = hundredths / U256::from(100_u64);
    let frac = low_two_digits(hundredths);
    format!("{sign}{whole}.{frac:02}%")
}

pub fn format_percent_wad_unsigned(apr_wad: Option<U256>) -> String {
    format_percent_wad(apr_wad.and_then(|v| I256::try_from(v).ok()))
}

/// Render a basis-point rate as a percentage with two fractional digits.
pub fn format_bps_percent(bps: Option<U256>) -> String {
    let Some(bps) = bps else {
        return NOT_AVAILABLE.to_owned();
    };
    let whole = bps / U256::from(100_u64);
    let frac = low_two_digits(bps);
    format!("{whole}.{frac:02}%")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn u(v: u64) -> U256 {
        U256::from(v)
    }

    #[test]
    fn div_up_rounds_toward_protocol() {
        assert_eq!(div_up(u(0), u(5)), Some(u(0)));
        assert_eq!(div_up(u(1), u(5)), Some(u(1)));
        assert_eq!(div_up(u(5), u(5)), Some(u(1)));
        assert_eq!(div_up(u(6), u(5)), Some(u(2)));
        assert_eq!(div_up(u(6), u(0)), None);
    }

    #[test]
    fn share_conversion_zero_is_zero() {
        assert_eq!(
            shares_to_assets_up(u(0), u(123_456), u(789)),
            Some(U256::ZERO)
        );
    }

    #[test]
    fn share_conversion_known_vector() {
        // 1,000,000 shares against 2,000,000 assets / 1,000,000,000 shares
        // converts as ceil(1,000,000 * 2,000,001 / 1,001,000,000) = 1999.
        let got = shares_to_assets_up(u(1_000_000), u(2_000_000), u(1_000_000_000));
        assert_eq!(got, Some(u(1999)));
    }

    #[test]
    fn share_conversion_is_monotonic() -> eyre::Result<()> {
        let total_assets = u(2_000_000);
        let total_shares = u(1_000_000_000);
        let mut prev = U256::ZERO;
        for shares in [0_u64, 1, 17, 999, 1_000_000, 5_000_000] {
            let got = shares_to_assets_up(u(shares), total_assets, total_shares)
                .ok_or_else(|| eyre::eyre!("conversion unavailable at {shares} shares"))?;
            assert!(got >= prev, "conversion decreased at {shares} shares");
            prev = got;
        }
        Ok(())
    }

    #[test]
    fn flat_pps_annualizes_to_zero() {
        let pps = u(1_234_567);
        let apr = annualized_apr_wad(pps, pps, 604_800);
        assert_eq!(apr, Some(I256::ZERO));
    }

    #[test]
    fn zero_historical_pps_is_unavailable() {
        assert_eq!(annualized_apr_wad(u(5), u(0), 604_800), None);
    }

    #[test]
    fn declining_pps_annualizes_negative() -> eyre::Result<()> {
        let apr = annualized_apr_wad(u(900), u(1000), 604_800)
            .ok_or_else(|| eyre::eyre!("expected an APR"))?;
        assert!(apr.is_negative(), "expected negative APR, got {apr}");
        Ok(())
    }

    #[test]
    fn bps_scale() {
        assert_eq!(bps_to_wad(u(1)), Some(BPS_TO_WAD_SCALE));
        // 100 bps == 1% == 10^16
        assert_eq!(
            bps_to_wad(u(100)),
            Some(U256::from(10_u64).pow(U256::from(16_u64)))
        );
        // 10,000 bps == 100% == 1 WAD
        assert_eq!(bps_to_wad(u(10_000)), Some(WAD));
    }

    #[test]
    fn blend_is_capital_weighted() {
        // 4% over 100 units and 2% over 300 units blends to 2.5%.
        let four_pct = bps_to_wad(u(400)).unwrap_or_default();
        let two_pct = bps_to_wad(u(200)).unwrap_or_default();
        let got = blend_weighted_apr(four_pct, u(100), two_pct, u(300));
        assert_eq!(got, bps_to_wad(u(250)));
    }

    #[test]
    fn blend_with_zero_weights_is_unavailable() {
        assert_eq!(blend_weighted_apr(WAD, u(0), WAD, u(0)), None);
    }

    #[test]
    fn percent_rendering() -> eyre::Result<()> {
        assert_eq!(format_percent_wad(None), NOT_AVAILABLE);
        assert_eq!(format_percent_wad(Some(I256::ZERO)), "0.00%");

        // 3.07% = 0.0307 WAD
        let wad_307 = I256::try_from(u(30_700_000_000_000_000))?;
        assert_eq!(format_percent_wad(Some(wad_307)), "3.07%");
        assert_eq!(
            format_percent_wad(wad_307.checked_neg()),
            "-3.07%"
        );
        Ok(())
    }

    #[test]
    fn bps_rendering() {
        assert_eq!(format_bps_percent(None), NOT_AVAILABLE);
        assert_eq!(format_bps_percent(Some(u(1234))), "12.34%");
        assert_eq!(format_bps_percent(Some(u(5))), "0.05%");
        assert_eq!(format_bps_percent(Some(u(0))), "0.00%");
    }
}
