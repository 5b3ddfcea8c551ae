//! Shared foundations for the tempovec workspace.
//!
//! Architecture rules:
//! - This crate owns the unified error type and the handful of constants
//!   that both the dictionary and the loss kernels need to agree on.
//! - No I/O, no threading, no numeric kernels live here — those belong to
//!   `tempovec-train`.

pub mod error;

pub use error::{Result, TempovecError};

/// Capacity of the dictionary's open-addressed hash table.
///
/// ```
/// use tempovec_core::MAX_VOCAB_SIZE;
/// assert_eq!(MAX_VOCAB_SIZE, 30_000_000);
/// ```
pub const MAX_VOCAB_SIZE: usize = 30_000_000;

/// Maximum bytes considered for one corpus line before giving up on it.
pub const MAX_LINE_SIZE: usize = 1024;

/// Size of the shared negative-sampling table.
///
/// ```
/// use tempovec_core::NEGATIVE_TABLE_SIZE;
/// assert_eq!(NEGATIVE_TABLE_SIZE, 10_000_000);
/// ```
pub const NEGATIVE_TABLE_SIZE: usize = 10_000_000;

/// Sigmoid lookup table resolution.
pub const SIGMOID_TABLE_SIZE: usize = 512;

/// Sigmoid lookup table saturates outside `[-MAX_SIGMOID, MAX_SIGMOID]`.
pub const MAX_SIGMOID: f64 = 8.0;

/// Log lookup table resolution.
pub const LOG_TABLE_SIZE: usize = 512;

/// FNV-1a-style hash offset basis used by the dictionary's string hash.
pub const HASH_OFFSET_BASIS: u32 = 2_166_136_261;

/// FNV-1a-style hash prime used by the dictionary's string hash.
pub const HASH_PRIME: u32 = 16_777_619;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constants_match_documented_values() {
        assert_eq!(MAX_VOCAB_SIZE, 30_000_000);
        assert_eq!(NEGATIVE_TABLE_SIZE, 10_000_000);
        assert_eq!(SIGMOID_TABLE_SIZE, 512);
        assert_eq!(LOG_TABLE_SIZE, 512);
    }
}
