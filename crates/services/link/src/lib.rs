//! The link engine of a BTP relay.
//!
//! A [`Link`] follows the source chain through a [`ports::Receiver`], packs
//! the block updates, block proofs and message proofs it builds into size
//! bounded relay messages, and delivers them in order to the destination
//! through a [`ports::Sender`], recovering from the verifier reverts.

#![deny(clippy::arithmetic_side_effects)]
#![deny(unused_must_use)]
#![deny(missing_docs)]

pub mod accumulator;
pub mod config;
pub mod error;
pub mod ports;
pub mod recovery;
mod receive_statuses;
pub mod service;
pub mod window;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;

#[cfg(test)]
btp_relay_trace::enable_tracing!();

pub use config::Config;
pub use error::{
    Error,
    FatalError,
    Result,
};
pub use service::{
    Link,
    LinkReport,
};
