//! The crate `btp-relay-types` contains the primitive types shared by the
//! BTP relay link services: the destination link status, the source chain
//! checkpoints, and the items a relay message is composed of.

#![deny(missing_docs)]
#![deny(unused_must_use)]

pub mod btp_address;
pub mod link_status;
pub mod receive_status;
pub mod relay_message;
pub mod revert;
pub mod services;

pub use btp_address::{
    AddressError,
    BtpAddress,
};
pub use link_status::{
    BmcLinkStatus,
    VerifierStatus,
};
pub use receive_status::ReceiveStatus;
pub use relay_message::{
    BlockProof,
    BlockUpdate,
    ItemKind,
    MessageProof,
    RelayId,
    RelayMessageItem,
};
pub use revert::{
    ErrorCode,
    RevertCode,
};
