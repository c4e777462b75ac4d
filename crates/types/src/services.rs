//! Types exchanged with the services the link depends on.

pub mod sender;
