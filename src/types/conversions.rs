use ethers::types::{Address, U256};
use rust_decimal::Decimal;
use std::str::FromStr;

// Las direcciones se comparan siempre en minúsculas (formato de la base de datos)
pub fn address_to_string(addr: Address) -> String {
    format!("{:?}", addr).to_lowercase()
}

pub fn string_to_address(s: &str) -> Result<Address, ConversionError> {
    Address::from_str(s.trim()).map_err(|e| ConversionError::InvalidAddress(e.to_string()))
}

/// Normalizes a textual address for identity and comparison purposes.
pub fn normalize_address(s: &str) -> String {
    s.trim().to_lowercase()
}

/// Parses an on-chain integer stored as a decimal string (`totalSupply`,
/// `rewards_perSecond`, token amounts).
pub fn parse_uint_string(value: &str) -> Result<U256, ConversionError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ConversionError::InvalidDecimal("empty amount".to_string()));
    }
    U256::from_dec_str(trimmed).map_err(|e| ConversionError::InvalidDecimal(e.to_string()))
}

/// True when a stored amount is strictly positive.
///
/// Integer amounts are parsed as `U256` (they routinely exceed `Decimal`'s
/// range); amounts already scaled by decimals fall back to `Decimal`.
pub fn is_positive_amount(value: &str) -> Result<bool, ConversionError> {
    if let Ok(as_uint) = parse_uint_string(value) {
        return Ok(!as_uint.is_zero());
    }
    let decimal = Decimal::from_str(value.trim())
        .or_else(|_| Decimal::from_scientific(value.trim()))
        .map_err(|e| ConversionError::InvalidDecimal(e.to_string()))?;
    Ok(decimal > Decimal::ZERO)
}

#[derive(Debug, thiserror::Error)]
pub enum ConversionError {
    #[error("Invalid decimal: {0}")]
    InvalidDecimal(String),
    #[error("Invalid address: {0}")]
    InvalidAddress(String),
}
