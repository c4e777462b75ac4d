//! Source chain checkpoints.

/// A source chain block (or epoch) that contains events for the link.
///
/// The proof material for the events stays with the receiver; the link only
/// tracks where the events are and how many have been seen.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReceiveStatus {
    /// The source chain height.
    pub height: i64,
    /// The cumulative number of link events observed through `height`.
    pub seq: i64,
}

impl ReceiveStatus {
    /// Creates a new checkpoint.
    pub fn new(height: i64, seq: i64) -> Self {
        Self { height, seq }
    }
}
