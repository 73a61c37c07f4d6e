//! Scripted [`PriceSource`] for tests, keyed by source identity.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use fairsettle_types::AccountId;
use rust_decimal::Decimal;

use crate::source::{PriceSource, SourceConfig, SourceFailure, SourceQuote};

#[derive(Debug, Clone, Default)]
pub struct MockPriceSource {
    quotes: BTreeMap<AccountId, Result<SourceQuote, SourceFailure>>,
}

impl MockPriceSource {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_price(&mut self, identity: AccountId, price: Decimal, observed_at: DateTime<Utc>) {
        self.set_quote(identity, SourceQuote::new(price, observed_at));
    }

    pub fn set_quote(&mut self, identity: AccountId, quote: SourceQuote) {
        self.quotes.insert(identity, Ok(quote));
    }

    pub fn set_failure(&mut self, identity: AccountId, failure: SourceFailure) {
        self.quotes.insert(identity, Err(failure));
    }

    pub fn clear(&mut self, identity: &AccountId) {
        self.quotes.remove(identity);
    }
}

impl PriceSource for MockPriceSource {
    fn get_price(&self, source: &SourceConfig) -> Result<SourceQuote, SourceFailure> {
        self.quotes.get(&source.identity).cloned().unwrap_or_else(|| {
            Err(SourceFailure::Unavailable(format!(
                "no scripted quote for {}",
                source.identity.short()
            )))
        })
    }
}
