//! Gas price bidding.

use alloy_core::primitives::U256;

use crate::{chain::ChainClient, error::DeployError};

/// Default percentage added on top of the network gas price.
pub const DEFAULT_BUMP_PERCENT: u64 = 20;

/// Computes the gas price bid for each transaction from the current network fee
/// plus a fixed percentage bump.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GasPriceStrategy {
    bump_percent: u64,
}

impl GasPriceStrategy {
    /// Create a strategy, rejecting bumps below 1%.
    pub fn new(bump_percent: u64) -> Result<Self, DeployError> {
        if bump_percent < 1 {
            return Err(DeployError::config(format!(
                "gas price bump must be >= 1, got {bump_percent}"
            )));
        }
        Ok(Self { bump_percent })
    }

    /// The configured bump percentage.
    pub fn bump_percent(&self) -> u64 {
        self.bump_percent
    }

    /// Bid for the given base fee using this strategy's bump.
    pub fn bid(&self, base_fee: U256) -> Result<U256, DeployError> {
        compute_bid(base_fee, self.bump_percent)
    }

    /// Fetch the current fee from the chain and compute a fresh bid.
    ///
    /// Called right before every submission since the fee drifts between stages.
    pub async fn current_bid<C: ChainClient>(
        &self,
        client: &C,
        stage: &str,
    ) -> Result<U256, DeployError> {
        let base_fee = client
            .base_fee()
            .await
            .map_err(|e| e.into_stage_error(stage))?;
        let bid = self.bid(base_fee)?;
        tracing::debug!(%base_fee, %bid, bump_percent = self.bump_percent, "Computed gas bid");
        Ok(bid)
    }
}

impl Default for GasPriceStrategy {
    fn default() -> Self {
        Self {
            bump_percent: DEFAULT_BUMP_PERCENT,
        }
    }
}

/// `base_fee + base_fee * bump_percent / 100` in integer arithmetic.
///
/// The division truncates. When that leaves a zero bump, one fee unit is added
/// instead, so the bid is always strictly above `base_fee`.
pub fn compute_bid(base_fee: U256, bump_percent: u64) -> Result<U256, DeployError> {
    if bump_percent < 1 {
        return Err(DeployError::config(format!(
            "gas price bump must be >= 1, got {bump_percent}"
        )));
    }

    let hundred = U256::from(100u64);
    let overflow = || DeployError::config(format!("gas bid overflows for base fee {base_fee}"));

    let scaled = base_fee
        .checked_mul(U256::from(bump_percent))
        .ok_or_else(overflow)?;
    let bump = (scaled / hundred).max(U256::from(1u64));

    base_fee.checked_add(bump).ok_or_else(overflow)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bid_matches_percentage_formula() {
        let base = U256::from(30_000_000_000u64);
        assert_eq!(
            compute_bid(base, 20).unwrap(),
            U256::from(36_000_000_000u64)
        );
        assert_eq!(
            compute_bid(base, 100).unwrap(),
            U256::from(60_000_000_000u64)
        );
    }

    #[test]
    fn test_bump_truncates() {
        // 101 * 20 / 100 = 20.2
        assert_eq!(compute_bid(U256::from(101u64), 20).unwrap(), U256::from(121u64));
        // 7 * 20 / 100 = 1.4
        assert_eq!(compute_bid(U256::from(7u64), 20).unwrap(), U256::from(8u64));
        // 1 * 20 / 100 truncates to zero, one unit is added instead.
        assert_eq!(compute_bid(U256::from(1u64), 20).unwrap(), U256::from(2u64));
    }

    #[test]
    fn test_bid_strictly_above_base() {
        for base in [0u64, 1, 7, 99, 100, 101, 1_000_000_007] {
            for bump in [1u64, 2, 20, 50, 250] {
                let base = U256::from(base);
                assert!(
                    compute_bid(base, bump).unwrap() > base,
                    "bid must exceed base {base} for bump {bump}"
                );
            }
        }
    }

    #[test]
    fn test_zero_bump_is_configuration_error() {
        assert!(matches!(
            compute_bid(U256::from(1_000u64), 0),
            Err(DeployError::Configuration(_))
        ));
        assert!(matches!(
            GasPriceStrategy::new(0),
            Err(DeployError::Configuration(_))
        ));
    }

    #[test]
    fn test_overflow_is_reported() {
        assert!(compute_bid(U256::MAX, 20).is_err());
    }

    #[test]
    fn test_default_bump() {
        assert_eq!(GasPriceStrategy::default().bump_percent(), DEFAULT_BUMP_PERCENT);
    }
}
