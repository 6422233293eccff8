//! Execution configuration.

use super::cost_model::{CostModel, DEFAULT_COMMISSION_PER_SHARE};
use super::liquidity::RemainderPolicy;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// `[execution]` section of the config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    pub commission_per_share: Decimal,
    pub remainder_policy: RemainderPolicy,
}

impl ExecutionConfig {
    pub fn cost_model(&self) -> CostModel {
        CostModel::new(self.commission_per_share)
    }

    pub fn frictionless() -> Self {
        Self {
            commission_per_share: Decimal::ZERO,
            ..Self::default()
        }
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            commission_per_share: DEFAULT_COMMISSION_PER_SHARE,
            remainder_policy: RemainderPolicy::Carry,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn partial_toml_keeps_defaults() {
        let config: ExecutionConfig = toml::from_str("remainder_policy = \"cancel\"").unwrap();
        assert_eq!(config.remainder_policy, RemainderPolicy::Cancel);
        assert_eq!(config.commission_per_share, dec!(0.005));
    }

    #[test]
    fn commission_accepts_string_decimal() {
        let config: ExecutionConfig = toml::from_str("commission_per_share = \"0.0035\"").unwrap();
        assert_eq!(config.cost_model().compute_commission(dec!(1000)), dec!(3.50));
    }
}
