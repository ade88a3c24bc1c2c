//! Engine configuration

use rust_decimal::Decimal;
use std::time::Duration;

use shared::checkout::RewardTier;

/// Checkout engine configuration
#[derive(Debug, Clone)]
pub struct CheckoutConfig {
    /// Settlement currency; captures in any other currency are rejected
    pub currency: String,
    /// Tier table mapping lifetime points to a conversion rate
    /// (currency per point)
    pub tiers: Vec<RewardTier>,
    /// Upper bound on external payment verification
    pub verify_timeout: Duration,
}

impl Default for CheckoutConfig {
    fn default() -> Self {
        Self {
            currency: "MYR".to_string(),
            tiers: vec![
                RewardTier {
                    min_points: 0,
                    max_points: 1999,
                    rate: Decimal::new(1, 2), // 0.010
                },
                RewardTier {
                    min_points: 2000,
                    max_points: 4999,
                    rate: Decimal::new(12, 3), // 0.012
                },
                RewardTier {
                    min_points: 5000,
                    max_points: 9999,
                    rate: Decimal::new(15, 3), // 0.015
                },
                RewardTier {
                    min_points: 10_000,
                    max_points: u32::MAX,
                    rate: Decimal::new(2, 2), // 0.020
                },
            ],
            verify_timeout: Duration::from_secs(10),
        }
    }
}
