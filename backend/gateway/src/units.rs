//! Token amount conversion.
//!
//! Contract calls carry amounts in the token's smallest unit (wei for
//! 18-decimal tokens). Humans type and read decimal strings. Conversion
//! happens here and only here; everything between the CLI boundary and
//! the ABI encoder works on [`U256`] wei values.

use alloy_primitives::U256;

use crate::errors::{GatewayError, Result};

/// Decimals used by the EDU token and the native currency alike.
pub const EDU_DECIMALS: u32 = 18;

/// Parse a decimal string like `"2.5"` into smallest-unit form.
///
/// Rejects empty input, non-digit characters, more than one decimal
/// point, and fractions longer than `decimals` digits.
pub fn parse_units(amount: &str, decimals: u32) -> Result<U256> {
    let amount = amount.trim();
    if amount.is_empty() || amount == "." {
        return Err(GatewayError::InvalidInput(
            "Amount must be a decimal number".to_string(),
        ));
    }

    let (int_part, frac_part) = match amount.split_once('.') {
        Some((i, f)) => (i, f),
        None => (amount, ""),
    };

    if frac_part.contains('.') {
        return Err(GatewayError::InvalidInput(format!(
            "Malformed amount: {amount}"
        )));
    }
    if frac_part.len() > decimals as usize {
        return Err(GatewayError::InvalidInput(format!(
            "Amount {amount} has more than {decimals} fractional digits"
        )));
    }

    let int_part = if int_part.is_empty() { "0" } else { int_part };
    let int_value = U256::from_str_radix(int_part, 10)
        .map_err(|_| GatewayError::InvalidInput(format!("Malformed amount: {amount}")))?;

    let frac_value = if frac_part.is_empty() {
        U256::ZERO
    } else {
        let scale = U256::from(10u64).pow(U256::from(decimals as usize - frac_part.len()));
        let digits = U256::from_str_radix(frac_part, 10)
            .map_err(|_| GatewayError::InvalidInput(format!("Malformed amount: {amount}")))?;
        digits * scale
    };

    let unit = U256::from(10u64).pow(U256::from(decimals));
    int_value
        .checked_mul(unit)
        .and_then(|v| v.checked_add(frac_value))
        .ok_or_else(|| GatewayError::InvalidInput(format!("Amount {amount} overflows")))
}

/// Format a smallest-unit value back into a decimal string.
///
/// Trailing zeros in the fraction are trimmed; whole values render
/// without a decimal point.
pub fn format_units(value: U256, decimals: u32) -> String {
    let unit = U256::from(10u64).pow(U256::from(decimals));
    let whole = value / unit;
    let frac = value % unit;

    if frac.is_zero() {
        return whole.to_string();
    }

    let frac_str = format!("{frac:0>width$}", width = decimals as usize);
    let trimmed = frac_str.trim_end_matches('0');
    format!("{whole}.{trimmed}")
}

/// Parse an EDU token amount (18 decimals).
pub fn parse_edu(amount: &str) -> Result<U256> {
    parse_units(amount, EDU_DECIMALS)
}

/// Format an EDU token amount (18 decimals).
pub fn format_edu(value: U256) -> String {
    format_units(value, EDU_DECIMALS)
}
