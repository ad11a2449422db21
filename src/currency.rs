//! Conversion of payment amounts into the reference currency.

use std::collections::HashMap;

use rust_decimal::Decimal;

use crate::error::LedgerError;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RateTableError {
    #[error("rate for {currency} must be positive, got {rate}")]
    NonPositiveRate { currency: String, rate: Decimal },

    #[error("reference currency {currency} must have rate 1, got {rate}")]
    ReferenceRate { currency: String, rate: Decimal },
}

/// Units of each currency per one unit of the reference currency.
///
/// Codes are stored upper-cased. The reference currency always maps to 1.
#[derive(Debug, Clone, PartialEq)]
pub struct RateTable {
    reference: String,
    rates: HashMap<String, Decimal>,
}

impl RateTable {
    pub fn new(
        reference: &str,
        rates: impl IntoIterator<Item = (String, Decimal)>,
    ) -> Result<Self, RateTableError> {
        let reference = reference.trim().to_ascii_uppercase();
        let mut table = HashMap::new();
        for (code, rate) in rates {
            let code = code.trim().to_ascii_uppercase();
            if rate <= Decimal::ZERO {
                return Err(RateTableError::NonPositiveRate {
                    currency: code,
                    rate,
                });
            }
            if code == reference && rate != Decimal::ONE {
                return Err(RateTableError::ReferenceRate {
                    currency: code,
                    rate,
                });
            }
            table.insert(code, rate);
        }
        table.insert(reference.clone(), Decimal::ONE);
        Ok(Self {
            reference,
            rates: table,
        })
    }

    pub fn reference(&self) -> &str {
        &self.reference
    }

    pub fn rate(&self, currency: &str) -> Option<Decimal> {
        self.rates
            .get(currency.trim().to_ascii_uppercase().as_str())
            .copied()
    }
}

/// Maps `(amount, currency)` onto the reference currency using an injected
/// [`RateTable`].
#[derive(Debug, Clone)]
pub struct CurrencyNormalizer {
    table: RateTable,
}

impl CurrencyNormalizer {
    pub fn new(table: RateTable) -> Self {
        Self { table }
    }

    pub fn reference_currency(&self) -> &str {
        self.table.reference()
    }

    /// Converts `amount` into the reference currency.
    ///
    /// Codes missing from the table are assumed to already be in the
    /// reference currency and pass through unchanged. Fails when the
    /// converted amount does not fit in a `Decimal`.
    pub fn normalize(&self, amount: Decimal, currency: &str) -> Result<Decimal, LedgerError> {
        match self.table.rate(currency) {
            Some(rate) => amount.checked_div(rate).ok_or_else(|| {
                LedgerError::InvalidAmount(format!("{amount} {currency} is too large to convert"))
            }),
            None => {
                tracing::debug!(currency, "no rate configured, passing amount through");
                Ok(amount)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    fn normalizer() -> CurrencyNormalizer {
        let table = RateTable::new(
            "USD",
            [("GHS".to_string(), dec!(10)), ("ngn".to_string(), dec!(1500))],
        )
        .unwrap();
        CurrencyNormalizer::new(table)
    }

    #[test]
    fn divides_by_units_per_reference_unit() {
        assert_eq!(normalizer().normalize(dec!(100), "GHS").unwrap(), dec!(10));
        assert_eq!(normalizer().normalize(dec!(3000), "NGN").unwrap(), dec!(2));
    }

    #[test]
    fn currency_codes_are_case_insensitive() {
        assert_eq!(normalizer().normalize(dec!(100), "ghs").unwrap(), dec!(10));
        assert_eq!(normalizer().normalize(dec!(1500), " Ngn ").unwrap(), dec!(1));
    }

    #[test]
    fn reference_currency_is_identity() {
        assert_eq!(normalizer().normalize(dec!(42.50), "USD").unwrap(), dec!(42.50));
        assert_eq!(normalizer().reference_currency(), "USD");
    }

    #[test]
    fn unknown_currency_passes_through() {
        assert_eq!(normalizer().normalize(dec!(50), "ZZZ").unwrap(), dec!(50));
    }

    #[test]
    fn conversion_overflow_is_an_invalid_amount() {
        let table = RateTable::new("USD", [("GBP".to_string(), dec!(0.79))]).unwrap();
        let normalizer = CurrencyNormalizer::new(table);

        let err = normalizer.normalize(Decimal::MAX, "GBP").unwrap_err();
        assert!(matches!(err, LedgerError::InvalidAmount(_)));
        assert_eq!(normalizer.normalize(dec!(79), "GBP").unwrap(), dec!(100));
    }

    #[test]
    fn rejects_non_positive_rates() {
        let err = RateTable::new("USD", [("GHS".to_string(), Decimal::ZERO)]).unwrap_err();
        assert_eq!(
            err,
            RateTableError::NonPositiveRate {
                currency: "GHS".into(),
                rate: Decimal::ZERO,
            }
        );
    }

    #[test]
    fn rejects_reference_rate_other_than_one() {
        assert!(RateTable::new("usd", [("USD".to_string(), dec!(2))]).is_err());
        assert!(RateTable::new("usd", [("USD".to_string(), dec!(1))]).is_ok());
    }
}
