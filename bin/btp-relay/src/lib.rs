#![deny(clippy::arithmetic_side_effects)]
#![deny(clippy::cast_possible_truncation)]

pub mod cli;

use tikv_jemallocator as _; // Used only by the binary
