//! The items a relay message is composed of.

use crate::link_status::BmcLinkStatus;
use bytes::Bytes;

/// A locally generated identifier of a submitted relay message.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    derive_more::Display,
    derive_more::From,
    derive_more::Into,
)]
pub struct RelayId(u64);

impl RelayId {
    /// Creates an id from its raw value.
    pub const fn new(id: u64) -> Self {
        Self(id)
    }
}

/// The type tag of a [`RelayMessageItem`].
///
/// The order of the variants is the order the items must have inside one
/// relay message.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, strum_macros::Display,
)]
pub enum ItemKind {
    /// A block header with the votes proving it, advancing the verifier height.
    BlockUpdate,
    /// A proof that a block is part of the already verified chain.
    BlockProof,
    /// Events with their receipt proofs, advancing the received sequence.
    MessageProof,
}

/// A block update bringing the verifier from `src_height` to `target_height`.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockUpdate {
    /// The verifier height the update was built against.
    pub src_height: i64,
    /// The verifier height once the update is applied.
    pub target_height: i64,
    /// The chain specific serialization.
    pub payload: Bytes,
}

/// A proof of the block at `proof_height` against the verifier's accumulator.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockProof {
    /// The height of the proven block.
    pub proof_height: i64,
    /// The chain specific serialization.
    pub payload: Bytes,
}

/// The proof of the events `start_seq..=last_seq`.
///
/// A proof with `last_seq < start_seq` carries no event.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageProof {
    /// The sequence of the first event in the proof.
    pub start_seq: i64,
    /// The sequence of the last event in the proof.
    pub last_seq: i64,
    /// The chain specific serialization.
    pub payload: Bytes,
}

impl MessageProof {
    /// The number of events in the proof.
    pub fn events(&self) -> i64 {
        self.last_seq
            .saturating_sub(self.start_seq)
            .saturating_add(1)
            .max(0)
    }

    /// Returns `true` if the proof carries no event.
    pub fn is_empty(&self) -> bool {
        self.events() == 0
    }
}

/// A typed unit of a relay message.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, derive_more::From)]
pub enum RelayMessageItem {
    /// See [`BlockUpdate`].
    BlockUpdate(BlockUpdate),
    /// See [`BlockProof`].
    BlockProof(BlockProof),
    /// See [`MessageProof`].
    MessageProof(MessageProof),
}

impl RelayMessageItem {
    /// The type tag of the item.
    pub fn kind(&self) -> ItemKind {
        match self {
            RelayMessageItem::BlockUpdate(_) => ItemKind::BlockUpdate,
            RelayMessageItem::BlockProof(_) => ItemKind::BlockProof,
            RelayMessageItem::MessageProof(_) => ItemKind::MessageProof,
        }
    }

    /// The chain specific serialization of the item.
    pub fn payload(&self) -> &Bytes {
        match self {
            RelayMessageItem::BlockUpdate(update) => &update.payload,
            RelayMessageItem::BlockProof(proof) => &proof.payload,
            RelayMessageItem::MessageProof(proof) => &proof.payload,
        }
    }

    /// The size of the item in bytes, as accounted against the transaction
    /// size limit.
    pub fn len(&self) -> i64 {
        i64::try_from(self.payload().len()).unwrap_or(i64::MAX)
    }

    /// Returns `true` if the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.payload().is_empty()
    }

    /// Applies the item to `status`, as the destination will once the item
    /// is verified.
    pub fn update_link_status(&self, status: &mut BmcLinkStatus) {
        match self {
            RelayMessageItem::BlockUpdate(update) => {
                status.verifier.height = update.target_height;
            }
            RelayMessageItem::BlockProof(_) => {}
            RelayMessageItem::MessageProof(proof) => {
                if !proof.is_empty() {
                    status.rx_seq = proof.last_seq;
                }
            }
        }
    }

    /// Returns the block update, if the item is one.
    pub fn as_block_update(&self) -> Option<&BlockUpdate> {
        match self {
            RelayMessageItem::BlockUpdate(update) => Some(update),
            _ => None,
        }
    }

    /// Returns the block proof, if the item is one.
    pub fn as_block_proof(&self) -> Option<&BlockProof> {
        match self {
            RelayMessageItem::BlockProof(proof) => Some(proof),
            _ => None,
        }
    }

    /// Returns the message proof, if the item is one.
    pub fn as_message_proof(&self) -> Option<&MessageProof> {
        match self {
            RelayMessageItem::MessageProof(proof) => Some(proof),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message_proof(start_seq: i64, last_seq: i64) -> RelayMessageItem {
        MessageProof {
            start_seq,
            last_seq,
            payload: Bytes::from_static(b"proof"),
        }
        .into()
    }

    #[test]
    fn block_update_advances_verifier_height_only() {
        let mut status = BmcLinkStatus::new(100, 10);
        let update: RelayMessageItem = BlockUpdate {
            src_height: 100,
            target_height: 105,
            payload: Bytes::from_static(&[0; 32]),
        }
        .into();

        update.update_link_status(&mut status);

        assert_eq!(status, BmcLinkStatus::new(105, 10));
        assert_eq!(update.len(), 32);
        assert_eq!(update.kind(), ItemKind::BlockUpdate);
    }

    #[test]
    fn message_proof_advances_rx_seq_only() {
        let mut status = BmcLinkStatus::new(100, 10);

        message_proof(11, 14).update_link_status(&mut status);

        assert_eq!(status, BmcLinkStatus::new(100, 14));
    }

    #[test]
    fn empty_message_proof_leaves_status_untouched() {
        let mut status = BmcLinkStatus::new(100, 10);
        let proof = message_proof(11, 10);

        proof.update_link_status(&mut status);

        assert!(proof.as_message_proof().unwrap().is_empty());
        assert_eq!(status, BmcLinkStatus::new(100, 10));
    }

    #[test]
    fn item_kinds_are_ordered_as_in_a_message() {
        assert!(ItemKind::BlockUpdate < ItemKind::BlockProof);
        assert!(ItemKind::BlockProof < ItemKind::MessageProof);
    }
}
