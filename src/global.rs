//! Optional process-wide wallet instance.
//!
//! Host bindings that cannot carry a handle across calls can park one
//! [`Wallet`] here. The core never touches this module; library users who
//! can own the wallet themselves should.

use std::sync::Mutex;

use lazy_static::lazy_static;

use crate::error::{WalletError, WalletResult};
use crate::wallet::Wallet;

lazy_static! {
    static ref GLOBAL_WALLET: Mutex<Option<Wallet>> = Mutex::new(None);
}

/// Install a wallet as the process-wide instance, returning the previous
/// one if any.
pub fn install(wallet: Wallet) -> Option<Wallet> {
    lock_slot().replace(wallet)
}

/// Remove and return the process-wide instance.
pub fn take() -> Option<Wallet> {
    lock_slot().take()
}

pub fn is_installed() -> bool {
    lock_slot().is_some()
}

/// Run `f` against the installed wallet, serializing callers.
pub fn with<R>(f: impl FnOnce(&mut Wallet) -> WalletResult<R>) -> WalletResult<R> {
    let mut slot = lock_slot();
    let wallet = slot.as_mut().ok_or(WalletError::NoWallet)?;
    f(wallet)
}

fn lock_slot() -> std::sync::MutexGuard<'static, Option<Wallet>> {
    // A panic while holding the lock leaves only the Option inside; the
    // wallet state itself stays coherent, so poisoning is ignored.
    GLOBAL_WALLET
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}
