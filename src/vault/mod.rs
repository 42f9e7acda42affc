//! Encrypted storage and backup.
//!
//! Three layers: crypto capability traits and their production
//! implementations ([`crypto`]), the authenticated-encrypted slot store
//! over a platform [`store::StorageBackend`] ([`store`]), and the
//! MAC-protected export/import envelope ([`backup`]).

pub mod backup;
pub mod crypto;
pub mod store;

pub use backup::{BackupEnvelope, BackupPayload};
pub use store::{EncryptedStore, MemoryBackend, StorageBackend};
