//! 256-bit unsigned integer arithmetic.
//!
//! Wraps `ruint::aliases::U256` to provide a stable interface. The proof-of-work
//! kernel only needs construction from digest bytes and a remainder check, so
//! that is all this adapter exposes.

use ruint::aliases::U256 as Ruint256;
use std::ops::Rem;

/// A 256-bit unsigned integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct U256(Ruint256);

impl U256 {
    /// Zero constant.
    pub const ZERO: Self = Self(Ruint256::ZERO);

    /// Create from big-endian bytes (digest order).
    pub fn from_be_bytes(bytes: [u8; 32]) -> Self {
        Self(Ruint256::from_be_bytes(bytes))
    }

    /// Create from little-endian bytes.
    #[cfg(test)]
    pub fn from_le_bytes(bytes: [u8; 32]) -> Self {
        Self(Ruint256::from_le_bytes(bytes))
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Convert to u64, saturating at u64::MAX.
    #[cfg(test)]
    pub fn saturating_to_u64(self) -> u64 {
        self.0.saturating_to()
    }
}

impl From<u64> for U256 {
    fn from(value: u64) -> Self {
        Self(Ruint256::from(value))
    }
}

impl Rem<u64> for U256 {
    type Output = Self;

    /// Panics if `rhs` is zero, like the primitive integer types.
    fn rem(self, rhs: u64) -> Self::Output {
        Self(self.0 % Ruint256::from(rhs))
    }
}
