use super::Address;
use std::fmt::{Display, Formatter};

/// Opaque 16-bit handle into a peer-signature registry. Stable for the
/// registry's lifetime. `0` is reserved to mean "none" -- never assigned by
/// [`crate::registry::PeerSignatureRegistry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PeerId(pub u16);

impl PeerId {
    pub const NONE: PeerId = PeerId(0);

    #[inline]
    pub const fn is_none(&self) -> bool {
        self.0 == 0
    }
}

impl Display for PeerId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u16> for PeerId {
    fn from(v: u16) -> Self {
        PeerId(v)
    }
}

impl From<PeerId> for u16 {
    fn from(v: PeerId) -> Self {
        v.0
    }
}

/// Uniquely names a peer across collectors: `(collector-name, peer-ip)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PeerSignature {
    collector: String,
    peer_ip: Address,
}

/// Collector names longer than this are rejected; mirrors the bounded
/// `collector-name: bounded string <= 128` field in the data model.
pub const COLLECTOR_NAME_MAX_LEN: usize = 128;

impl PeerSignature {
    pub fn new(collector: impl Into<String>, peer_ip: Address) -> Option<Self> {
        let collector = collector.into();
        if collector.len() > COLLECTOR_NAME_MAX_LEN {
            return None;
        }
        Some(PeerSignature { collector, peer_ip })
    }

    pub fn collector(&self) -> &str {
        &self.collector
    }

    pub fn peer_ip(&self) -> Address {
        self.peer_ip
    }
}

impl Display for PeerSignature {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.collector, self.peer_ip)
    }
}
