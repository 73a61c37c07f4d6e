//! Admin identity and the protocol-wide pause switch.
//!
//! Every settlement-surface mutation calls [`AccessControl::ensure_live`]
//! before touching state; every admin operation calls
//! [`AccessControl::ensure_admin`].

use fairsettle_types::{AccountId, FairsettleError, Result};

#[derive(Debug, Clone)]
pub struct AccessControl {
    admin: AccountId,
    paused: bool,
}

impl AccessControl {
    pub fn new(admin: AccountId) -> Result<Self> {
        if admin.is_null() {
            return Err(FairsettleError::NullAddress { what: "admin" });
        }
        Ok(Self {
            admin,
            paused: false,
        })
    }

    #[must_use]
    pub fn admin(&self) -> AccountId {
        self.admin
    }

    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn ensure_admin(&self, caller: AccountId) -> Result<()> {
        if caller == self.admin {
            Ok(())
        } else {
            tracing::warn!(caller = %caller.short(), "admin operation rejected");
            Err(FairsettleError::NotAdmin(caller))
        }
    }

    /// Fail with `Paused` while the protocol is paused.
    pub fn ensure_live(&self) -> Result<()> {
        if self.paused {
            Err(FairsettleError::Paused)
        } else {
            Ok(())
        }
    }

    /// Returns `false` if already paused.
    pub fn pause(&mut self, caller: AccountId) -> Result<bool> {
        self.ensure_admin(caller)?;
        let changed = !self.paused;
        self.paused = true;
        Ok(changed)
    }

    /// Returns `false` if not paused.
    pub fn unpause(&mut self, caller: AccountId) -> Result<bool> {
        self.ensure_admin(caller)?;
        let changed = self.paused;
        self.paused = false;
        Ok(changed)
    }

    /// Hand the admin role to `new_admin`. Returns the previous admin.
    pub fn transfer_admin(&mut self, caller: AccountId, new_admin: AccountId) -> Result<AccountId> {
        self.ensure_admin(caller)?;
        if new_admin.is_null() {
            return Err(FairsettleError::NullAddress { what: "new admin" });
        }
        let previous = self.admin;
        self.admin = new_admin;
        Ok(previous)
    }
}
