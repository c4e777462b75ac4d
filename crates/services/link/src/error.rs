//! Errors of the link engine.

use crate::window::EntrySummary;
use btp_relay_types::{
    BmcLinkStatus,
    ErrorCode,
    ItemKind,
    ReceiveStatus,
    RelayId,
};

/// The result type of the link operations.
pub type Result<T> = core::result::Result<T, Error>;

/// The errors that end a link, or a round of it.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An item alone exceeds the size limit of a relay message.
    #[error("{kind} of {size} bytes exceeds the relay message limit of {limit} bytes")]
    ItemTooLarge {
        /// The type of the item.
        kind: ItemKind,
        /// The size of the item.
        size: i64,
        /// The size limit.
        limit: i64,
    },
    /// A message proof does not continue the previous one.
    #[error("message proof starts at sequence {start_seq}, expected {expected}")]
    SequenceGap {
        /// The sequence the proof had to start at.
        expected: i64,
        /// The sequence the proof starts at.
        start_seq: i64,
    },
    /// A block update does not advance the verifier height.
    #[error("block update to height {target_height} does not advance height {last_height}")]
    HeightGap {
        /// The height reached by the previous block update.
        last_height: i64,
        /// The height reached by the rejected block update.
        target_height: i64,
    },
    /// The receiver reported a checkpoint behind the previous one.
    #[error("receive status {received:?} does not follow {last:?}")]
    ReceiveOrder {
        /// The last retained checkpoint.
        last: ReceiveStatus,
        /// The rejected checkpoint.
        received: ReceiveStatus,
    },
    /// A confirmation reached an entry while an earlier one is still unconfirmed.
    #[error("entry {id} is confirmed by `{status}` ahead of an earlier entry")]
    WindowOrder {
        /// The entry reached out of order.
        id: RelayId,
        /// The confirmed status.
        status: BmcLinkStatus,
    },
    /// The sender can't fit any item in a transaction.
    #[error("transaction size limit {tx_size_limit} leaves no room after a margin of {margin}")]
    InvalidSizeLimit {
        /// The transaction size limit of the sender.
        tx_size_limit: usize,
        /// The margin kept by the sender.
        margin: i64,
    },
    /// The receiver failed to serialize a segment into a relay message.
    #[error("failed to build the relay message: {0}")]
    Construction(anyhow::Error),
    /// The link was started twice.
    #[error("the link is already running")]
    AlreadyStarted,
    /// A revert the link can't recover from.
    #[error(transparent)]
    Fatal(#[from] FatalError),
    /// A collaborator failed; the link retries on the next trigger.
    #[error(transparent)]
    Port(#[from] anyhow::Error),
}

impl Error {
    /// Returns `true` if the link can't go on after the error.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Error::Port(_))
    }
}

/// A revert result the link can't recover from.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FatalError {
    /// The verifier is in an unknown state.
    #[error("relay message {id} reverted with {code}, the verifier state is unknown{}", context(.entry))]
    UnknownVerifierState {
        /// The relay message.
        id: RelayId,
        /// The revert code.
        code: ErrorCode,
        /// The entry, if still in flight.
        entry: Option<EntrySummary>,
    },
    /// The revert code is not one the link reacts to.
    #[error("relay message {id} reverted with unhandled code {code}{}", context(.entry))]
    UnhandledRevert {
        /// The relay message.
        id: RelayId,
        /// The revert code.
        code: ErrorCode,
        /// The entry, if still in flight.
        entry: Option<EntrySummary>,
    },
    /// A stale block witness was reported for an entry without block proof.
    #[error("relay message {id} reverted with {code} but holds no block proof{}", context(.entry))]
    MissingBlockProof {
        /// The relay message.
        id: RelayId,
        /// The revert code.
        code: ErrorCode,
        /// The entry.
        entry: Option<EntrySummary>,
    },
}

fn context(entry: &Option<EntrySummary>) -> String {
    entry
        .as_ref()
        .map(|entry| format!(" ({entry})"))
        .unwrap_or_default()
}
