//! In-memory source and destination chains, for tests and simulations.
//!
//! Both chains share a made up wire format: the destination decodes the
//! relay messages built by the source and verifies them the way a BMV would.

#![allow(clippy::arithmetic_side_effects)]

mod codec;
mod destination;
mod source;

pub use destination::{
    DestinationData,
    MockDestination,
    Relayed,
};
pub use source::{
    MockSourceChain,
    SourceData,
};
