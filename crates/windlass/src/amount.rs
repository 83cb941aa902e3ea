use crate::errors::WindlassError;
use alloy::primitives::{Address, U256};
use eyre::Context as _;

pub(crate) fn pow10(decimals: u8) -> eyre::Result<U256> {
    U256::from(10_u64)
        .checked_pow(U256::from(decimals))
        .ok_or_else(|| eyre::eyre!("decimals too large"))
}

fn invalid(message: String) -> eyre::Report {
    WindlassError::InvalidInput(message).into()
}

fn parse_digits(s: &str, what: &str) -> eyre::Result<U256> {
    if !s.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid(format!("invalid {what} digits: {s:?}")));
    }
    U256::from_str_radix(s, 10).with_context(|| format!("parse {what}"))
}

/// Parse a human decimal amount ("1.5") into base units at the given token
/// decimals. Rejects negatives, malformed digits, and excess precision.
pub fn parse_amount_ui(s: &str, decimals: u8) -> eyre::Result<U256> {
    let s = s.trim();
    if s.is_empty() {
        return Err(invalid("empty amount".to_owned()));
    }

    let (whole, frac) = match s.split_once('.') {
        Some((a, b)) => (a, b),
        None => (s, ""),
    };

    if whole.starts_with('-') {
        return Err(invalid("amount must be non-negative".to_owned()));
    }

    let whole_v = if whole.is_empty() {
        U256::ZERO
    } else {
        parse_digits(whole, "whole")?
    };

    if frac.len() > decimals as usize {
        return Err(invalid(format!(
            "too many decimal places for token (decimals={decimals})"
        )));
    }

    let mut frac_s = frac.to_owned();
    while frac_s.len() < decimals as usize {
        frac_s.push('0');
    }
    let frac_v = if frac_s.is_empty() {
        U256::ZERO
    } else {
        parse_digits(&frac_s, "fractional")?
    };

    let scale = pow10(decimals)?;
    whole_v
        .checked_mul(scale)
        .and_then(|x| x.checked_add(frac_v))
        .ok_or_else(|| invalid("amount overflow".to_owned()))
}

/// Format a base-unit amount into a decimal string without using floats.
/// Trailing fractional zeros are trimmed.
pub fn format_amount(base: U256, decimals: u8) -> eyre::Result<String> {
    if decimals == 0 {
        return Ok(base.to_string());
    }
    let scale = pow10(decimals)?;
    let whole = base / scale;
    let frac = base % scale;
    if frac.is_zero() {
        return Ok(whole.to_string());
    }
    let mut frac_s = format!("{frac:0>width$}", width = decimals as usize);
    while frac_s.ends_with('0') {
        frac_s.pop();
    }
    Ok(format!("{whole}.{frac_s}"))
}

/// Display-precision variant: truncates (rounds toward zero) the fractional
/// part to at most `max_frac` digits.
pub fn format_amount_dp(base: U256, decimals: u8, max_frac: usize) -> eyre::Result<String> {
    let full = format_amount(base, decimals)?;
    let Some((whole, frac)) = full.split_once('.') else {
        return Ok(full);
    };
    if max_frac == 0 {
        return Ok(whole.to_owned());
    }
    let mut kept: String = frac.chars().take(max_frac).collect();
    while kept.ends_with('0') {
        kept.pop();
    }
    if kept.is_empty() {
        return Ok(whole.to_owned());
    }
    Ok(format!("{whole}.{kept}"))
}

/// Checksummed address shortened for human-readable output.
pub fn short_address(addr: Address) -> String {
    let full = addr.to_string();
    let head: String = full.chars().take(6).collect();
    let tail: String = full.chars().skip(full.chars().count().saturating_sub(4)).collect();
    format!("{head}..{tail}")
}

/// Unix seconds to a UTC wall-clock string; zero and out-of-range render "-".
pub fn format_timestamp_utc(unix_seconds: u64) -> String {
    if unix_seconds == 0 {
        return "-".to_owned();
    }
    let Ok(secs) = i64::try_from(unix_seconds) else {
        return "-".to_owned();
    };
    match chrono::DateTime::from_timestamp(secs, 0) {
        Some(dt) => dt.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        None => "-".to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr as _;

    #[test]
    fn parse_ui_amount_basic() {
        let v1 = parse_amount_ui("1", 6);
        assert!(v1.is_ok(), "parse failed: {v1:?}");
        assert_eq!(v1.ok(), Some(U256::from(1_000_000_u64)));

        let v15 = parse_amount_ui("1.5", 6);
        assert!(v15.is_ok(), "parse failed: {v15:?}");
        assert_eq!(v15.ok(), Some(U256::from(1_500_000_u64)));

        let vsmall = parse_amount_ui("0.000001", 6);
        assert!(vsmall.is_ok(), "parse failed: {vsmall:?}");
        assert_eq!(vsmall.ok(), Some(U256::from(1_u64)));

        let v0 = parse_amount_ui("0", 18);
        assert!(v0.is_ok(), "parse failed: {v0:?}");
        assert_eq!(v0.ok(), Some(U256::ZERO));
    }

    #[test]
    fn parse_ui_rejects_too_many_decimals() {
        let r = parse_amount_ui("1.0000001", 6);
        assert!(r.is_err(), "expected error, got ok");
        if let Err(err) = r {
            assert!(
                err.to_string().contains("too many decimal places"),
                "unexpected error: {err}"
            );
        }
    }

    #[test]
    fn parse_ui_rejects_negative_and_garbage() {
        assert!(parse_amount_ui("-1", 18).is_err(), "negative accepted");
        assert!(parse_amount_ui("1,5", 18).is_err(), "comma accepted");
        assert!(parse_amount_ui("0x10", 18).is_err(), "hex accepted");
        assert!(parse_amount_ui("", 18).is_err(), "empty accepted");
    }

    #[test]
    fn format_base_to_ui() -> eyre::Result<()> {
        let s1 = format_amount(U256::from(1_500_000_u64), 6)?;
        assert_eq!(s1, "1.5");
        let s2 = format_amount(U256::from(1_u64), 6)?;
        assert_eq!(s2, "0.000001");
        let s3 = format_amount(U256::from(10_000_000_u64), 6)?;
        assert_eq!(s3, "10");
        Ok(())
    }

    #[test]
    fn format_display_precision_truncates() -> eyre::Result<()> {
        let v = U256::from(1_234_567_890_u64);
        assert_eq!(format_amount_dp(v, 9, 4)?, "1.2345");
        assert_eq!(format_amount_dp(v, 9, 0)?, "1");
        assert_eq!(format_amount_dp(U256::from(1_500_000_001_u64), 9, 4)?, "1.5");
        Ok(())
    }

    #[test]
    fn short_address_keeps_ends() {
        let addr = Address::from_str("0x889edC2eDab5f40e902b864aD4d7AdE8E412F9B1")
            .unwrap_or_default();
        let s = short_address(addr);
        assert!(s.starts_with("0x88"), "unexpected head: {s}");
        assert!(s.ends_with("F9B1"), "unexpected tail: {s}");
    }

    #[test]
    fn timestamp_rendering() {
        assert_eq!(format_timestamp_utc(0), "-");
        let s = format_timestamp_utc(1_700_000_000);
        assert!(s.ends_with("UTC"), "unexpected rendering: {s}");
    }
}
