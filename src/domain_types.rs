//! Domain types for LogCrunch
//!
//! Strongly-typed values for the handful of fields with real invariants,
//! to keep validation at the boundary instead of sprinkled through handlers.

use nutype::nutype;

/// Operator-assigned alias for a connection. At most 32 characters.
#[nutype(
    validate(len_char_max = 32),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        Serialize,
        Deserialize,
        Display,
        TryFrom,
        Into
    )
)]
pub struct AliasName(String);

/// Hex-encoded 256-bit session identifier: exactly 64 hex characters.
#[nutype(
    validate(predicate = |s| s.len() == 64 && s.bytes().all(|b| b.is_ascii_hexdigit())),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        Hash,
        Serialize,
        Deserialize,
        Display,
        TryFrom,
        Into
    )
)]
pub struct SessionId(String);

/// Capacity of the agent's shared record channel.
#[nutype(
    validate(greater = 0),
    derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, TryFrom, Into)
)]
pub struct ChannelCapacity(usize);

impl ChannelCapacity {
    /// Default capacity of the shared agent channel.
    ///
    /// # Panics
    ///
    /// Never panics; 1024 satisfies the `greater = 0` validator.
    #[must_use]
    pub fn default_capacity() -> Self {
        Self::try_new(1024).expect("1024 is a valid channel capacity")
    }

    #[must_use]
    pub fn as_usize(&self) -> usize {
        self.into_inner()
    }
}
