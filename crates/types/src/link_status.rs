//! The status of a link as recorded by the destination BMC contract.

use bytes::Bytes;
use core::fmt;

/// The state of the verifier (BMV) of the link on the destination chain.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Default, Clone, PartialEq, Eq, Hash)]
pub struct VerifierStatus {
    /// The last source chain height verified by the destination.
    pub height: i64,
    /// Verifier specific data, opaque to the relay.
    pub extra: Bytes,
}

/// The destination's durable state of one link, returned by `getStatus(link)`.
///
/// `rx_seq` and `verifier.height` never decrease on the destination; they are
/// the only ground truth for what has been confirmed.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Default, Clone, PartialEq, Eq, Hash)]
pub struct BmcLinkStatus {
    /// The sequence number of the last message sent by the destination over the link.
    pub tx_seq: i64,
    /// The sequence number of the last message received by the destination.
    pub rx_seq: i64,
    /// The verifier state.
    pub verifier: VerifierStatus,
    /// The destination chain height the status was read at.
    pub current_height: i64,
}

impl BmcLinkStatus {
    /// Creates a status with the given verifier height and received sequence.
    pub fn new(height: i64, rx_seq: i64) -> Self {
        Self {
            rx_seq,
            verifier: VerifierStatus {
                height,
                extra: Bytes::new(),
            },
            ..Default::default()
        }
    }

    /// The last source chain height verified by the destination.
    pub fn height(&self) -> i64 {
        self.verifier.height
    }

    /// Returns `true` if `other` has caught up with `self` on both the verifier
    /// height and the received sequence.
    pub fn is_reached_by(&self, other: &BmcLinkStatus) -> bool {
        self.verifier.height <= other.verifier.height && self.rx_seq <= other.rx_seq
    }

    /// Returns `true` if `other` is behind `self` on either the verifier height
    /// or the received sequence.
    pub fn is_regressed_by(&self, other: &BmcLinkStatus) -> bool {
        other.verifier.height < self.verifier.height || other.rx_seq < self.rx_seq
    }

    /// The status holding the furthest value of each field of `self` and `other`.
    pub fn furthest(&self, other: &BmcLinkStatus) -> BmcLinkStatus {
        let verifier = if other.verifier.height > self.verifier.height {
            other.verifier.clone()
        } else {
            self.verifier.clone()
        };
        BmcLinkStatus {
            tx_seq: self.tx_seq.max(other.tx_seq),
            rx_seq: self.rx_seq.max(other.rx_seq),
            verifier,
            current_height: self.current_height.max(other.current_height),
        }
    }
}

impl fmt::Display for BmcLinkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "height:{} rx_seq:{} tx_seq:{} current:{}",
            self.verifier.height, self.rx_seq, self.tx_seq, self.current_height
        )
    }
}
