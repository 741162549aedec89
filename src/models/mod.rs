//! Core value types: addresses, prefixes, AS paths, peer identity, and the
//! ingested element form the view store consumes.

pub mod bgp;
pub mod network;

pub use bgp::*;
pub use network::*;
