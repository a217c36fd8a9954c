//! Unit Conversion Utilities
//!
//! Fixed-point helpers for satoshis, BTC, micro-STX and basis-point fees.
//! Amounts are integers everywhere; floats only appear at the Electrum
//! boundary where the node reports BTC/kB.

/// Satoshis per Bitcoin
pub const SATS_PER_BTC: u64 = 100_000_000;

/// Micro-STX per STX
pub const MICRO_STX_PER_STX: u64 = 1_000_000;

/// Basis points in 100%
pub const BPS_DENOMINATOR: u64 = 10_000;

/// Decimal places of BTC (and of the wrapped asset)
pub const BTC_DECIMALS: u32 = 8;

/// Decimal places of STX
pub const STX_DECIMALS: u32 = 6;

/// Format an integer amount with a fixed number of decimals.
///
/// `format_fixed(123_456_789, 8)` -> `"1.23456789"`
pub fn format_fixed(amount: u128, decimals: u32) -> String {
    if decimals == 0 {
        return amount.to_string();
    }
    let scale = 10u128.pow(decimals);
    format!(
        "{}.{:0width$}",
        amount / scale,
        amount % scale,
        width = decimals as usize
    )
}

/// Parse a decimal string into an integer amount with `decimals` places.
///
/// Rejects negative numbers, more fractional digits than `decimals`, and
/// anything that overflows `u64`.
pub fn parse_fixed(s: &str, decimals: u32) -> Option<u64> {
    let s = s.trim();
    if s.is_empty() || s.starts_with('-') {
        return None;
    }
    let (whole, frac) = match s.split_once('.') {
        Some((w, f)) => (w, f),
        None => (s, ""),
    };
    if frac.len() > decimals as usize {
        return None;
    }
    if !whole.chars().all(|c| c.is_ascii_digit()) || !frac.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let whole: u128 = if whole.is_empty() { 0 } else { whole.parse().ok()? };
    let mut frac_value: u128 = if frac.is_empty() { 0 } else { frac.parse().ok()? };
    frac_value *= 10u128.pow(decimals - frac.len() as u32);

    let total = whole
        .checked_mul(10u128.pow(decimals))?
        .checked_add(frac_value)?;
    u64::try_from(total).ok()
}

/// Convert satoshis to BTC string (e.g., "0.00100000")
pub fn sats_to_btc_string(sats: u64) -> String {
    format_fixed(sats as u128, BTC_DECIMALS)
}

/// Convert micro-STX to STX string (e.g., "1.500000")
pub fn micro_stx_to_stx_string(micro: u64) -> String {
    format_fixed(micro as u128, STX_DECIMALS)
}

/// Parse a BTC decimal string into satoshis
pub fn parse_btc(s: &str) -> Option<u64> {
    parse_fixed(s, BTC_DECIMALS)
}

/// Parse an STX decimal string into micro-STX
pub fn parse_stx(s: &str) -> Option<u64> {
    parse_fixed(s, STX_DECIMALS)
}

/// Convert a BTC float (as reported by Electrum) to satoshis with rounding
pub fn btc_to_sats(btc: f64) -> u64 {
    if !btc.is_finite() || btc <= 0.0 {
        return 0;
    }
    (btc * SATS_PER_BTC as f64).round() as u64
}

/// Convert an Electrum `estimatefee` result (BTC per kB) to sat/vB, rounding up.
///
/// Returns `None` when the node reports it cannot estimate (negative value).
pub fn fee_rate_from_btc_per_kb(btc_per_kb: f64) -> Option<u64> {
    if !btc_per_kb.is_finite() || btc_per_kb < 0.0 {
        return None;
    }
    let sats_per_kb = btc_to_sats(btc_per_kb);
    Some(sats_per_kb.div_ceil(1024).max(1))
}

/// Fee charged for `bps` basis points of `amount`, rounded down
pub fn fee_from_bps(amount: u64, bps: u64) -> u64 {
    ((amount as u128 * bps as u128) / BPS_DENOMINATOR as u128) as u64
}

/// Amount remaining after a `bps` basis-point fee is deducted
pub fn amount_after_fee(amount: u64, bps: u64) -> u64 {
    amount.saturating_sub(fee_from_bps(amount, bps))
}

/// Convert satoshis to human-readable string
/// e.g., 100000 -> "100,000 sats (0.00100000 BTC)"
pub fn sats_to_display(sats: u64) -> String {
    format!("{} sats ({} BTC)", format_with_commas(sats), sats_to_btc_string(sats))
}

/// Format number with thousands separators
fn format_with_commas(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + s.len() / 3);
    let chars: Vec<char> = s.chars().collect();

    for (i, c) in chars.iter().enumerate() {
        if i > 0 && (chars.len() - i) % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sats_to_btc() {
        assert_eq!(sats_to_btc_string(0), "0.00000000");
        assert_eq!(sats_to_btc_string(1), "0.00000001");
        assert_eq!(sats_to_btc_string(100_000_000), "1.00000000");
        assert_eq!(sats_to_btc_string(123_456_789), "1.23456789");
    }

    #[test]
    fn test_parse_fixed() {
        assert_eq!(parse_btc("1"), Some(100_000_000));
        assert_eq!(parse_btc("0.00000001"), Some(1));
        assert_eq!(parse_btc(".5"), Some(50_000_000));
        assert_eq!(parse_btc("0.000000001"), None);
        assert_eq!(parse_btc("-1"), None);
        assert_eq!(parse_btc("abc"), None);
        assert_eq!(parse_stx("2.5"), Some(2_500_000));
    }

    #[test]
    fn test_format_roundtrip_through_strings() {
        for sats in [0u64, 1, 5_500, 99_999_999, 2_100_000_000_000_000] {
            assert_eq!(parse_btc(&sats_to_btc_string(sats)), Some(sats));
        }
    }

    #[test]
    fn test_btc_to_sats() {
        assert_eq!(btc_to_sats(0.0), 0);
        assert_eq!(btc_to_sats(0.00000001), 1);
        assert_eq!(btc_to_sats(1.0), 100_000_000);
        assert_eq!(btc_to_sats(-1.0), 0);
    }

    #[test]
    fn test_fee_rate_from_electrum() {
        // 0.00001 BTC/kB = 1000 sats/kB -> ceil(1000/1024) = 1
        assert_eq!(fee_rate_from_btc_per_kb(0.00001), Some(1));
        // 0.0002 BTC/kB = 20000 sats/kB -> ceil(19.53) = 20
        assert_eq!(fee_rate_from_btc_per_kb(0.0002), Some(20));
        assert_eq!(fee_rate_from_btc_per_kb(-1.0), None);
    }

    #[test]
    fn test_bps_math() {
        assert_eq!(fee_from_bps(100_000, 30), 300);
        assert_eq!(amount_after_fee(100_000, 30), 99_700);
        assert_eq!(fee_from_bps(1, 30), 0);
        assert_eq!(amount_after_fee(10, 20_000), 0);
    }

    #[test]
    fn test_display_format() {
        let display = sats_to_display(1_000_000);
        assert!(display.contains("1,000,000"));
        assert!(display.contains("0.01000000 BTC"));
        assert_eq!(micro_stx_to_stx_string(1_500_000), "1.500000");
    }
}
