//! Value conservation invariant.
//!
//! ```text
//! Σ deposits == Σ paid + Σ refunded + Σ escrowed
//! ```
//!
//! Deposits are the only inflow. Payouts and refunds are the only
//! outflows. Whatever has come in and not gone out must still be sitting
//! in some settlement's escrow.

use fairsettle_types::{FairsettleError, Result};
use rust_decimal::Decimal;

#[derive(Debug, Clone, Default)]
pub struct ValueConservation {
    deposited: Decimal,
    paid: Decimal,
    refunded: Decimal,
}

impl ValueConservation {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an inflow. On `AmountOverflow` the totals are unchanged.
    pub fn record_deposit(&mut self, amount: Decimal) -> Result<()> {
        self.deposited = checked_total(self.deposited, amount)?;
        Ok(())
    }

    pub fn record_payout(&mut self, amount: Decimal) -> Result<()> {
        self.paid = checked_total(self.paid, amount)?;
        Ok(())
    }

    pub fn record_refund(&mut self, amount: Decimal) -> Result<()> {
        self.refunded = checked_total(self.refunded, amount)?;
        Ok(())
    }

    #[must_use]
    pub fn total_deposited(&self) -> Decimal {
        self.deposited
    }

    #[must_use]
    pub fn total_paid(&self) -> Decimal {
        self.paid
    }

    #[must_use]
    pub fn total_refunded(&self) -> Decimal {
        self.refunded
    }

    /// Compare the running totals against `escrowed`, the sum of every
    /// settlement's remaining escrow.
    ///
    /// # Errors
    /// `ConservationViolation` if value was created or destroyed.
    pub fn verify(&self, escrowed: Decimal) -> Result<()> {
        let accounted = self
            .paid
            .checked_add(self.refunded)
            .and_then(|out| out.checked_add(escrowed));
        if accounted != Some(self.deposited) || escrowed < Decimal::ZERO {
            return Err(FairsettleError::ConservationViolation {
                reason: format!(
                    "deposited {} != paid {} + refunded {} + escrowed {escrowed}",
                    self.deposited, self.paid, self.refunded
                ),
            });
        }
        Ok(())
    }
}

fn checked_total(total: Decimal, amount: Decimal) -> Result<Decimal> {
    total
        .checked_add(amount)
        .ok_or(FairsettleError::AmountOverflow)
}
