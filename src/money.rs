//! Currency registry and amount validation
//!
//! All amounts are `rust_decimal::Decimal`. Each currency carries a fixed
//! number of decimals; an amount with more fractional digits than that is
//! rejected, never rounded.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::CurrencyConfig;
use crate::error::LedgerError;

/// Precision used when a currency is not in the registry (satoshi scale)
pub const DEFAULT_DECIMALS: u32 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetKind {
    Crypto,
    Fiat,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrencySpec {
    pub code: String,
    pub decimals: u32,
    pub kind: AssetKind,
    pub required_confirmations: u32,
}

impl CurrencySpec {
    /// 10^-decimals
    pub fn smallest_unit(&self) -> Decimal {
        Decimal::new(1, self.decimals)
    }

    pub fn is_crypto(&self) -> bool {
        self.kind == AssetKind::Crypto
    }
}

#[derive(Debug, Clone, Default)]
pub struct CurrencyRegistry {
    specs: BTreeMap<String, CurrencySpec>,
}

impl CurrencyRegistry {
    pub fn new(specs: impl IntoIterator<Item = CurrencySpec>) -> Self {
        Self {
            specs: specs.into_iter().map(|s| (s.code.clone(), s)).collect(),
        }
    }

    pub fn from_config(currencies: &[CurrencyConfig]) -> Result<Self, LedgerError> {
        let mut specs = Vec::with_capacity(currencies.len());
        for c in currencies {
            if c.decimals > 18 {
                return Err(LedgerError::Validation(format!(
                    "{} declares {} decimals, at most 18 are supported",
                    c.code, c.decimals
                )));
            }
            specs.push(CurrencySpec {
                code: c.code.clone(),
                decimals: c.decimals,
                kind: c.kind,
                required_confirmations: c.required_confirmations,
            });
        }
        Ok(Self::new(specs))
    }

    pub fn get(&self, code: &str) -> Result<&CurrencySpec, LedgerError> {
        self.specs
            .get(code)
            .ok_or_else(|| LedgerError::UnsupportedCurrency(code.to_string()))
    }

    pub fn contains(&self, code: &str) -> bool {
        self.specs.contains_key(code)
    }

    /// Currency codes in sorted order
    pub fn codes(&self) -> Vec<String> {
        self.specs.keys().cloned().collect()
    }

    pub fn crypto(&self) -> impl Iterator<Item = &CurrencySpec> {
        self.specs.values().filter(|s| s.is_crypto())
    }

    pub fn iter(&self) -> impl Iterator<Item = &CurrencySpec> {
        self.specs.values()
    }

    /// Reconciliation tolerance for a currency; unknown codes fall back to 1e-8
    pub fn tolerance(&self, code: &str) -> Decimal {
        self.specs
            .get(code)
            .map(CurrencySpec::smallest_unit)
            .unwrap_or_else(|| Decimal::new(1, DEFAULT_DECIMALS))
    }

    /// Check that `amount` fits the currency's precision. Sign is not checked.
    pub fn validate_precision(&self, code: &str, amount: Decimal) -> Result<(), LedgerError> {
        let spec = self.get(code)?;
        if amount.normalize().scale() > spec.decimals {
            return Err(LedgerError::PrecisionOverflow {
                currency: code.to_string(),
                amount,
                max_decimals: spec.decimals,
            });
        }
        Ok(())
    }

    /// Amount must be strictly positive and within precision
    pub fn validate_positive(&self, code: &str, amount: Decimal) -> Result<(), LedgerError> {
        if amount <= Decimal::ZERO {
            return Err(LedgerError::Validation(format!(
                "amount must be greater than zero, got {}",
                amount
            )));
        }
        self.validate_precision(code, amount)
    }

    /// Amount must be non-zero and within precision
    pub fn validate_signed(&self, code: &str, amount: Decimal) -> Result<(), LedgerError> {
        if amount.is_zero() {
            return Err(LedgerError::Validation("amount must not be zero".into()));
        }
        self.validate_precision(code, amount)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn registry() -> CurrencyRegistry {
        CurrencyRegistry::new([
            CurrencySpec {
                code: "BTC".into(),
                decimals: 8,
                kind: AssetKind::Crypto,
                required_confirmations: 6,
            },
            CurrencySpec {
                code: "GBP".into(),
                decimals: 2,
                kind: AssetKind::Fiat,
                required_confirmations: 0,
            },
        ])
    }

    #[test]
    fn test_smallest_unit() {
        let r = registry();
        assert_eq!(r.tolerance("BTC"), Decimal::from_str("0.00000001").unwrap());
        assert_eq!(r.tolerance("GBP"), Decimal::from_str("0.01").unwrap());
        assert_eq!(r.tolerance("XYZ"), Decimal::from_str("0.00000001").unwrap());
    }

    #[test]
    fn test_precision_validation() {
        let r = registry();
        assert!(r.validate_positive("GBP", Decimal::from_str("10.25").unwrap()).is_ok());
        // Trailing zeros do not count against precision
        assert!(r.validate_positive("GBP", Decimal::from_str("10.2500").unwrap()).is_ok());
        let err = r
            .validate_positive("GBP", Decimal::from_str("10.255").unwrap())
            .unwrap_err();
        assert_eq!(err.code(), "PRECISION_OVERFLOW");
    }

    #[test]
    fn test_sign_validation() {
        let r = registry();
        assert!(r.validate_positive("BTC", Decimal::ZERO).is_err());
        assert!(r.validate_positive("BTC", Decimal::from(-1)).is_err());
        assert!(r.validate_signed("BTC", Decimal::from(-1)).is_ok());
        assert!(r.validate_signed("BTC", Decimal::ZERO).is_err());
    }

    #[test]
    fn test_unknown_currency() {
        let err = registry().validate_positive("DOGE", Decimal::ONE).unwrap_err();
        assert_eq!(err, LedgerError::UnsupportedCurrency("DOGE".into()));
    }

    #[test]
    fn test_crypto_filter() {
        let r = registry();
        let crypto: Vec<_> = r.crypto().map(|s| s.code.as_str()).collect();
        assert_eq!(crypto, vec!["BTC"]);
        assert_eq!(r.codes(), vec!["BTC".to_string(), "GBP".to_string()]);
    }
}
