//! Error codes reported by the destination BMC and BMV contracts.
//!
//! Codes are grouped in ranges of 15: BTP from 0, BMC from 10, BMV from 25,
//! BSH from 40, reserved from 55.

use core::fmt;

/// The base code of the BMC errors.
pub const CODE_BMC: i64 = 10;
/// The base code of the BMV errors.
pub const CODE_BMV: i64 = 25;

/// A raw error code of a failed relay transaction.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, derive_more::From, derive_more::Into,
)]
pub struct ErrorCode(i64);

impl ErrorCode {
    /// Creates a code from its raw value.
    pub const fn new(code: i64) -> Self {
        Self(code)
    }

    /// The raw value.
    pub const fn value(&self) -> i64 {
        self.0
    }

    /// The known revert the code stands for, if any.
    pub fn revert(&self) -> Option<RevertCode> {
        RevertCode::from_repr(self.0)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.revert() {
            Some(revert) => write!(f, "{revert}({})", self.0),
            None => write!(f, "Unknown({})", self.0),
        }
    }
}

/// The reverts the relay knows how to react to.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    strum_macros::Display,
    strum_macros::FromRepr,
)]
#[cfg_attr(test, derive(strum_macros::EnumIter))]
#[repr(i64)]
pub enum RevertCode {
    /// The relay is not registered for the link.
    BMCRevertUnauthorized = CODE_BMC + 1,
    /// The verifier is in a state it can't recover from.
    BMVUnknown = CODE_BMV,
    /// The message can't be verified against the verifier state.
    BMVNotVerifiable = CODE_BMV + 1,
    /// The message was already verified.
    BMVAlreadyVerified = CODE_BMV + 2,
    /// The block proof was built against an outdated accumulator.
    BMVRevertInvalidBlockWitnessOld = CODE_BMV + 3,
}

impl RevertCode {
    /// The error code of the revert.
    pub const fn code(self) -> ErrorCode {
        ErrorCode(self as i64)
    }
}

impl From<RevertCode> for ErrorCode {
    fn from(revert: RevertCode) -> Self {
        revert.code()
    }
}
