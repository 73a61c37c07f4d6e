//! Outward value sink: balances credited by payouts and refunds.
//!
//! Credits are applied in two steps. [`Ledger::prepare`] computes every new
//! balance with checked arithmetic and fails without touching the ledger;
//! [`Ledger::apply`] then commits the batch and cannot fail. The engine
//! prepares while validating and applies only after the settlement's own
//! state has been updated.

use std::collections::BTreeMap;

use fairsettle_types::{AccountId, FairsettleError, Result};
use rust_decimal::Decimal;

/// Checked, not yet committed credits. Only [`Ledger::prepare`] builds one.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub struct CreditBatch {
    balances: BTreeMap<AccountId, Decimal>,
    total_credited: Decimal,
}

impl CreditBatch {
    /// Accounts whose balance the batch sets.
    pub fn accounts(&self) -> impl Iterator<Item = &AccountId> {
        self.balances.keys()
    }
}

#[derive(Debug, Clone, Default)]
pub struct Ledger {
    balances: BTreeMap<AccountId, Decimal>,
    total_credited: Decimal,
}

impl Ledger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn credit(&mut self, account: AccountId, amount: Decimal) -> Result<()> {
        let batch = self.prepare(&[(account, amount)])?;
        self.apply(batch);
        Ok(())
    }

    /// Compute the balances after crediting every `(account, amount)`.
    /// An account may appear more than once.
    ///
    /// # Errors
    /// `AmountOverflow` if any balance or the running total would overflow.
    pub fn prepare(&self, credits: &[(AccountId, Decimal)]) -> Result<CreditBatch> {
        let mut balances = BTreeMap::new();
        let mut total_credited = self.total_credited;
        for (account, amount) in credits {
            let entry = balances
                .entry(*account)
                .or_insert_with(|| self.balance(account));
            *entry = entry
                .checked_add(*amount)
                .ok_or(FairsettleError::AmountOverflow)?;
            total_credited = total_credited
                .checked_add(*amount)
                .ok_or(FairsettleError::AmountOverflow)?;
        }
        Ok(CreditBatch {
            balances,
            total_credited,
        })
    }

    /// Commit a batch produced by [`prepare`](Self::prepare) on this ledger.
    ///
    /// Batches must be applied in the order they were prepared, with no
    /// other credit in between.
    pub fn apply(&mut self, batch: CreditBatch) {
        self.balances.extend(batch.balances);
        self.total_credited = batch.total_credited;
    }

    #[must_use]
    pub fn balance(&self, account: &AccountId) -> Decimal {
        self.balances.get(account).copied().unwrap_or(Decimal::ZERO)
    }

    #[must_use]
    pub fn total_credited(&self) -> Decimal {
        self.total_credited
    }

    pub fn iter(&self) -> impl Iterator<Item = (&AccountId, &Decimal)> {
        self.balances.iter()
    }
}
