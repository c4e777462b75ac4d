//! Maps the revert of a relay message to the action restoring the link.

use crate::{
    error::FatalError,
    window::InFlight,
};
use btp_relay_types::{
    ErrorCode,
    RelayId,
    RevertCode,
};

/// What the link does about a reverted relay message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Nothing, the entry already left the window.
    Ignore,
    /// Drop the entry and every later one, then build again from the
    /// destination status.
    Rebuild(RelayId),
    /// Drop the entry and every earlier one, they are already applied.
    Discard(RelayId),
    /// Build the block proof at `height` again and resubmit the entry.
    RebuildBlockProof {
        /// The entry.
        id: RelayId,
        /// The height of the block proof.
        height: i64,
    },
    /// Submit the entry again as it is.
    Resubmit(RelayId),
}

/// Decides how to recover from the revert `code` of the relay message `id`.
///
/// `entry` is `None` when the message already left the window: the result is
/// stale and only the codes that can't be recovered from still matter.
pub fn recover(
    id: RelayId,
    code: ErrorCode,
    entry: Option<&InFlight>,
) -> Result<Action, FatalError> {
    let summary = || entry.map(InFlight::summary);
    let Some(revert) = code.revert() else {
        return Err(FatalError::UnhandledRevert {
            id,
            code,
            entry: summary(),
        })
    };
    let action = match (revert, entry) {
        (RevertCode::BMVUnknown, _) => {
            return Err(FatalError::UnknownVerifierState {
                id,
                code,
                entry: summary(),
            })
        }
        (RevertCode::BMVAlreadyVerified, _) => Action::Discard(id),
        (_, None) => Action::Ignore,
        (RevertCode::BMVNotVerifiable, Some(_)) => Action::Rebuild(id),
        (RevertCode::BMVRevertInvalidBlockWitnessOld, Some(entry)) => {
            match entry.block_proof() {
                Some((_, proof)) => Action::RebuildBlockProof {
                    id,
                    height: proof.proof_height,
                },
                None => {
                    return Err(FatalError::MissingBlockProof {
                        id,
                        code,
                        entry: summary(),
                    })
                }
            }
        }
        (RevertCode::BMCRevertUnauthorized, Some(_)) => Action::Resubmit(id),
    };
    Ok(action)
}
