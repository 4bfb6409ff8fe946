use thiserror::Error;

/// Errors surfaced by the in-memory address manager.
///
/// These are reserved for states that should be structurally impossible
/// (placement corruption). Ordinary rejection of bad input (malformed
/// timestamps, bad ports) is handled by sanitizing or dropping, never by
/// returning an error.
#[derive(Debug, Error)]
pub enum AddrManError {
    #[error("address {0} is neither in the new table nor the tried table")]
    OrphanedAddress(String),

    #[error("bucket {bucket} in the {table} table holds more than {limit} slots")]
    BucketOverflow {
        table: &'static str,
        bucket: usize,
        limit: usize,
    },

    #[error("address {0} already occupies a tried slot")]
    DuplicateTriedSlot(String),
}

/// Errors from the persistent snapshot store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("snapshot I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("snapshot is corrupt: {0}")]
    Corrupt(String),

    #[error("failed to encode snapshot: {0}")]
    Encode(#[from] bincode::Error),
}
