//! The messages of the destination chain sender.

use crate::{
    link_status::BmcLinkStatus,
    relay_message::RelayId,
    revert::ErrorCode,
};

/// The outcome of a relay transaction, reported by the sender.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayResult {
    /// The id the message was relayed with.
    pub id: RelayId,
    /// The revert code, `None` if the transaction succeeded.
    pub err: Option<ErrorCode>,
}

/// The state of a relay transaction on the destination chain.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStatus {
    /// The transaction is not yet final.
    Pending,
    /// The transaction is final and succeeded.
    Finalized,
    /// The transaction is final and reverted with the code.
    Reverted(ErrorCode),
}

impl TxStatus {
    /// Converts a final status into the result of the relay `id`.
    pub fn into_result(self, id: RelayId) -> Option<RelayResult> {
        match self {
            TxStatus::Pending => None,
            TxStatus::Finalized => Some(RelayResult { id, err: None }),
            TxStatus::Reverted(code) => Some(RelayResult {
                id,
                err: Some(code),
            }),
        }
    }
}

/// A message from the sender to the link.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, derive_more::From)]
pub enum SenderMessage {
    /// The destination confirmed a new link status.
    Status(BmcLinkStatus),
    /// A relay transaction became final.
    Result(RelayResult),
}
