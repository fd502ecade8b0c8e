//! Rate table: unit prices per (service, region).

use std::collections::HashMap;
use std::path::Path;

use rust_decimal::Decimal;
use tracing::info;

use crate::error::BillingError;

/// Pure lookup of unit prices. A missing entry is a configuration error
/// for that billing run; there is no fallback rate.
#[derive(Debug, Clone, Default)]
pub struct RateTable {
    rates: HashMap<(String, String), Decimal>,
}

impl RateTable {
    /// Load rates from a delimited file with one `region,service,price`
    /// entry per line. Blank lines and `#` comments are skipped.
    pub fn from_file(path: &Path) -> Result<Self, BillingError> {
        let contents = std::fs::read_to_string(path)?;
        let mut rates = HashMap::new();

        for (lineno, line) in contents.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut fields = line.split(',').map(str::trim);
            let (region, service, price) = match (fields.next(), fields.next(), fields.next()) {
                (Some(r), Some(s), Some(p)) if fields.next().is_none() => (r, s, p),
                _ => {
                    return Err(BillingError::Config(anyhow::anyhow!(
                        "malformed rate at {}:{}: expected 'region,service,price'",
                        path.display(),
                        lineno + 1
                    )))
                }
            };
            let price: Decimal = price.parse().map_err(|e| {
                BillingError::Config(anyhow::anyhow!(
                    "invalid price for service '{}' at {}:{}: {}",
                    service,
                    path.display(),
                    lineno + 1,
                    e
                ))
            })?;
            rates.insert((service.to_string(), region.to_string()), price);
        }

        info!(path = %path.display(), entries = rates.len(), "Rate table loaded");
        Ok(Self { rates })
    }

    pub fn from_entries<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (String, String, Decimal)>,
    {
        let rates = entries
            .into_iter()
            .map(|(service, region, price)| ((service, region), price))
            .collect();
        Self { rates }
    }

    /// Unit price for a service in a region.
    pub fn rate(&self, service: &str, region: &str) -> Result<Decimal, BillingError> {
        self.rates
            .get(&(service.to_string(), region.to_string()))
            .copied()
            .ok_or_else(|| BillingError::RateNotFound {
                service: service.to_string(),
                region: region.to_string(),
            })
    }

    pub fn len(&self) -> usize {
        self.rates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rates.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::io::Write;

    #[test]
    fn parses_rates_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# region,service,price").unwrap();
        writeln!(file, "wellington,bandwidth-out,0.02").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "wellington,instance,0.35").unwrap();

        let table = RateTable::from_file(file.path()).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.rate("bandwidth-out", "wellington").unwrap(), dec!(0.02));
    }

    #[test]
    fn malformed_line_is_a_config_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "wellington,bandwidth-out").unwrap();
        assert!(matches!(
            RateTable::from_file(file.path()),
            Err(BillingError::Config(_))
        ));
    }

    #[test]
    fn missing_rate_is_fatal_not_defaulted() {
        let table = RateTable::from_entries(vec![(
            "instance".to_string(),
            "wellington".to_string(),
            dec!(0.35),
        )]);
        let err = table.rate("instance", "auckland").unwrap_err();
        assert!(matches!(err, BillingError::RateNotFound { .. }));
    }
}
