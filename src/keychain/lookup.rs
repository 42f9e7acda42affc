//! Reverse address lookup.
//!
//! Resolves an address string back to the derivation path that produced
//! it. Custom paths are checked first (payment, then ordinals), then a
//! bounded scan over {script type} x {account} x {receive, change} x
//! {index}. The scan order only affects performance: addresses are unique
//! per path under standard assumptions.
//!
//! A miss is reported as `Ok(None)` ("not ours"), never as an error, so
//! wallets with gaps larger than the configured windows silently fall
//! through to the caller.

use crate::error::WalletResult;
use crate::logging::abbrev;
use crate::types::{AddressPurpose, DerivedAddress, ScriptType};
use crate::{log_debug, log_warn};

use super::KeyChain;

impl KeyChain {
    /// Resolve an address back to its derivation path.
    pub fn find_address_path(&mut self, address: &str) -> WalletResult<Option<DerivedAddress>> {
        // Custom overrides win and are checked in fixed order.
        for purpose in [AddressPurpose::Payment, AddressPurpose::Ordinals] {
            if let Some(path) = self.custom_paths().get(purpose).map(str::to_owned) {
                // A malformed override must not poison lookup of standard
                // paths.
                match self.derive_address_from_path(&path) {
                    Ok(candidate) => {
                        if candidate.address == address {
                            return Ok(Some(candidate));
                        }
                    }
                    Err(_) => {
                        log_warn!("keychain", "skipping malformed custom {:?} path", purpose);
                    }
                }
            }
        }

        let config = self.lookup_config();
        for script_type in ScriptType::ALL {
            for account in 0..=config.max_account_index {
                for (change, window) in [(0, config.receive_window), (1, config.change_window)] {
                    for index in 0..window {
                        let candidate =
                            self.derive_address(script_type, account, change, index)?;
                        if candidate.address == address {
                            log_debug!(
                                "keychain",
                                "resolved {} to {}",
                                abbrev(address),
                                candidate.path
                            );
                            return Ok(Some(candidate));
                        }
                    }
                }
            }
        }

        Ok(None)
    }
}
