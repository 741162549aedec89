//! BGP-level value types: AS paths and the ingested element form.

pub mod aspath;
mod elem;

pub use aspath::{AsPath, AsPathSegment, OriginAs};
pub use elem::*;
