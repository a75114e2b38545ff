//! Runtime configuration read from the environment (and `.env` when present).

use anyhow::{anyhow, Result};
use rust_decimal::Decimal;
use std::env;
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use crate::domain::aggregates::PricingPolicy;
use crate::services::orders::OrderSettings;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub nats_url: Option<String>,
    pub currency: String,
    pub tax_rate: Decimal,
    pub free_shipping_threshold: Decimal,
    pub flat_shipping_fee: Decimal,
    pub return_window_days: i64,
    pub order_number_prefix: String,
    pub seed_catalog: Option<PathBuf>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        let config = Self::from_lookup(|name| env::var(name).ok())?;
        tracing::info!(
            port = config.port,
            persistent = config.database_url.is_some(),
            events = config.nats_url.is_some(),
            "configuration loaded"
        );
        Ok(config)
    }

    /// Builds the config from any key lookup; unset or blank keys take
    /// their defaults, malformed ones are errors.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let config = Self {
            port: parse_or(&get, "PORT", 8083)?,
            database_url: get("DATABASE_URL"),
            database_max_connections: parse_or(&get, "DATABASE_MAX_CONNECTIONS", 10)?,
            nats_url: get("NATS_URL"),
            currency: get("STORE_CURRENCY").unwrap_or_else(|| "NGN".to_string()),
            tax_rate: parse_or(&get, "TAX_RATE", Decimal::new(75, 3))?,
            free_shipping_threshold: parse_or(&get, "FREE_SHIPPING_THRESHOLD", Decimal::from(50_000))?,
            flat_shipping_fee: parse_or(&get, "FLAT_SHIPPING_FEE", Decimal::from(2_500))?,
            return_window_days: parse_or(&get, "RETURN_WINDOW_DAYS", 30)?,
            order_number_prefix: get("ORDER_NUMBER_PREFIX").unwrap_or_else(|| "TA".to_string()),
            seed_catalog: get("SEED_CATALOG").map(PathBuf::from),
        };

        if config.tax_rate < Decimal::ZERO || config.tax_rate >= Decimal::ONE {
            return Err(anyhow!("TAX_RATE must be a fraction in [0, 1), got {}", config.tax_rate));
        }
        if config.flat_shipping_fee < Decimal::ZERO || config.free_shipping_threshold < Decimal::ZERO {
            return Err(anyhow!("shipping amounts cannot be negative"));
        }
        if config.return_window_days < 0 {
            return Err(anyhow!("RETURN_WINDOW_DAYS cannot be negative"));
        }
        Ok(config)
    }

    pub fn pricing(&self) -> PricingPolicy {
        PricingPolicy {
            tax_rate: self.tax_rate,
            free_shipping_threshold: self.free_shipping_threshold,
            flat_shipping_fee: self.flat_shipping_fee,
        }
    }

    pub fn order_settings(&self) -> OrderSettings {
        OrderSettings {
            currency: self.currency.clone(),
            return_window_days: self.return_window_days,
            order_number_prefix: self.order_number_prefix.clone(),
        }
    }
}

fn parse_or<T>(get: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    match get(name) {
        Some(raw) => raw.parse().map_err(|e| anyhow!("invalid {name} {raw:?}: {e}")),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<AppConfig> {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        AppConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config(&[]).unwrap();
        assert_eq!(config.port, 8083);
        assert!(config.database_url.is_none());
        assert_eq!(config.pricing(), PricingPolicy::default());
        assert_eq!(config.order_settings(), OrderSettings::default());
    }

    #[test]
    fn test_overrides() {
        let config = config(&[("PORT", "9000"), ("TAX_RATE", "0.05"), ("ORDER_NUMBER_PREFIX", "JW"), ("NATS_URL", " ")]).unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.tax_rate, Decimal::new(5, 2));
        assert_eq!(config.order_settings().order_number_prefix, "JW");
        assert!(config.nats_url.is_none());
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(config(&[("PORT", "eighty")]).is_err());
        assert!(config(&[("TAX_RATE", "7.5")]).is_err());
        assert!(config(&[("RETURN_WINDOW_DAYS", "-1")]).is_err());
    }
}
