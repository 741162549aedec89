use super::AsPath;
use crate::error::{ViewStoreError, ViewStoreResult};
use crate::models::network::{Address, Prefix};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use num_enum::{IntoPrimitive, TryFromPrimitive};

/// BGP peer session state, mirroring the finite-state-machine values carried
/// by upstream collector messages. Only `Established` is active; every other
/// state means the peer contributes no prefixes.
///
/// Carries `num_enum` conversions because the wire protocol's `PeerState`
/// element transmits this as a single raw byte (see `wire::message`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PeerFsmState {
    Unknown = 0,
    Idle = 1,
    Connect = 2,
    Active = 3,
    OpenSent = 4,
    OpenConfirm = 5,
    Established = 6,
    Null = 7,
}

impl PeerFsmState {
    #[inline]
    pub fn is_active(&self) -> bool {
        matches!(self, PeerFsmState::Established)
    }
}

/// Discriminant for [`Element`]'s kind-specific payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElementKind {
    Rib {
        prefix: Prefix,
        nexthop: Option<Address>,
        aspath: AsPath,
    },
    Announce {
        prefix: Prefix,
        nexthop: Option<Address>,
        aspath: AsPath,
    },
    Withdraw {
        prefix: Prefix,
    },
    PeerState {
        old_state: PeerFsmState,
        new_state: PeerFsmState,
    },
}

/// A single unit of per-peer BGP information as handed to the view store by
/// the upstream collector-side ingest. This is the system's external input
/// boundary (spec §6) -- MRT/update parsing that produces these is out of
/// scope here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    pub timestamp: u32,
    pub peer_address: Address,
    pub peer_asn: u32,
    pub kind: ElementKind,
}

impl Element {
    pub fn prefix(&self) -> Option<Prefix> {
        match &self.kind {
            ElementKind::Rib { prefix, .. }
            | ElementKind::Announce { prefix, .. }
            | ElementKind::Withdraw { prefix } => Some(*prefix),
            ElementKind::PeerState { .. } => None,
        }
    }

    pub fn aspath(&self) -> Option<&AsPath> {
        match &self.kind {
            ElementKind::Rib { aspath, .. } | ElementKind::Announce { aspath, .. } => Some(aspath),
            _ => None,
        }
    }
}

const KIND_RIB: u8 = 1;
const KIND_ANNOUNCE: u8 = 2;
const KIND_WITHDRAW: u8 = 3;
const KIND_PEER_STATE: u8 = 4;

impl Element {
    /// Encodes this element for transport as a `PrefixRecord` payload (spec
    /// §4.G/§6): the collector name isn't repeated here, since it's already
    /// established by the enclosing table's `TableBegin`.
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32(self.timestamp);
        put_address(buf, &self.peer_address);
        buf.put_u32(self.peer_asn);
        match &self.kind {
            ElementKind::Rib { prefix, nexthop, aspath } => {
                buf.put_u8(KIND_RIB);
                put_prefix(buf, prefix);
                put_nexthop(buf, nexthop);
                put_aspath(buf, aspath);
            }
            ElementKind::Announce { prefix, nexthop, aspath } => {
                buf.put_u8(KIND_ANNOUNCE);
                put_prefix(buf, prefix);
                put_nexthop(buf, nexthop);
                put_aspath(buf, aspath);
            }
            ElementKind::Withdraw { prefix } => {
                buf.put_u8(KIND_WITHDRAW);
                put_prefix(buf, prefix);
            }
            ElementKind::PeerState { old_state, new_state } => {
                buf.put_u8(KIND_PEER_STATE);
                buf.put_u8((*old_state).into());
                buf.put_u8((*new_state).into());
            }
        }
    }

    pub fn decode(buf: &mut Bytes) -> ViewStoreResult<Element> {
        require(buf, 4)?;
        let timestamp = buf.get_u32();
        let peer_address = get_address(buf)?;
        require(buf, 4)?;
        let peer_asn = buf.get_u32();
        require(buf, 1)?;
        let kind = match buf.get_u8() {
            KIND_RIB => {
                let prefix = get_prefix(buf)?;
                let nexthop = get_nexthop(buf)?;
                let aspath = get_aspath(buf)?;
                ElementKind::Rib { prefix, nexthop, aspath }
            }
            KIND_ANNOUNCE => {
                let prefix = get_prefix(buf)?;
                let nexthop = get_nexthop(buf)?;
                let aspath = get_aspath(buf)?;
                ElementKind::Announce { prefix, nexthop, aspath }
            }
            KIND_WITHDRAW => ElementKind::Withdraw {
                prefix: get_prefix(buf)?,
            },
            KIND_PEER_STATE => {
                require(buf, 2)?;
                let old_state = PeerFsmState::try_from(buf.get_u8())
                    .map_err(|e| ViewStoreError::Malformed(e.to_string()))?;
                let new_state = PeerFsmState::try_from(buf.get_u8())
                    .map_err(|e| ViewStoreError::Malformed(e.to_string()))?;
                ElementKind::PeerState { old_state, new_state }
            }
            other => {
                return Err(ViewStoreError::Malformed(format!(
                    "unknown element kind tag {other}"
                )))
            }
        };
        Ok(Element {
            timestamp,
            peer_address,
            peer_asn,
            kind,
        })
    }
}

fn require(buf: &Bytes, n: usize) -> ViewStoreResult<()> {
    if buf.remaining() < n {
        return Err(ViewStoreError::Malformed("truncated element".to_string()));
    }
    Ok(())
}

fn put_address(buf: &mut BytesMut, addr: &Address) {
    match addr {
        Address::V4(v4) => {
            buf.put_u8(4);
            buf.put_slice(&v4.octets());
        }
        Address::V6(v6) => {
            buf.put_u8(6);
            buf.put_slice(&v6.octets());
        }
    }
}

fn get_address(buf: &mut Bytes) -> ViewStoreResult<Address> {
    require(buf, 1)?;
    match buf.get_u8() {
        4 => {
            require(buf, 4)?;
            let mut octets = [0u8; 4];
            buf.copy_to_slice(&mut octets);
            Ok(Address::from(std::net::Ipv4Addr::from(octets)))
        }
        6 => {
            require(buf, 16)?;
            let mut octets = [0u8; 16];
            buf.copy_to_slice(&mut octets);
            Ok(Address::from(std::net::Ipv6Addr::from(octets)))
        }
        other => Err(ViewStoreError::Malformed(format!(
            "unknown address family tag {other}"
        ))),
    }
}

fn put_nexthop(buf: &mut BytesMut, nexthop: &Option<Address>) {
    match nexthop {
        Some(addr) => {
            buf.put_u8(1);
            put_address(buf, addr);
        }
        None => buf.put_u8(0),
    }
}

fn get_nexthop(buf: &mut Bytes) -> ViewStoreResult<Option<Address>> {
    require(buf, 1)?;
    match buf.get_u8() {
        0 => Ok(None),
        _ => Ok(Some(get_address(buf)?)),
    }
}

fn put_prefix(buf: &mut BytesMut, prefix: &Prefix) {
    put_address(buf, &prefix.address());
    buf.put_u8(prefix.prefix_len());
}

fn get_prefix(buf: &mut Bytes) -> ViewStoreResult<Prefix> {
    let address = get_address(buf)?;
    require(buf, 1)?;
    let prefix_len = buf.get_u8();
    if prefix_len > address.family_bits() {
        return Err(ViewStoreError::Malformed(
            "prefix length exceeds address family width".to_string(),
        ));
    }
    Ok(Prefix::new(address, prefix_len))
}

fn put_aspath(buf: &mut BytesMut, aspath: &AsPath) {
    let bytes = aspath.as_bytes();
    buf.put_u32(bytes.len() as u32);
    buf.put_slice(bytes);
}

fn get_aspath(buf: &mut Bytes) -> ViewStoreResult<AsPath> {
    require(buf, 4)?;
    let len = buf.get_u32() as usize;
    require(buf, len)?;
    let raw = buf.split_to(len);
    Ok(AsPath::from_bytes(raw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_fsm_state_roundtrip() {
        let state = PeerFsmState::Established;
        let byte: u8 = state.into();
        assert_eq!(byte, 6);
        assert_eq!(PeerFsmState::try_from(byte).unwrap(), state);
    }

    #[test]
    fn test_element_prefix_extraction() {
        let prefix = Prefix::from_str("10.0.0.0/24").unwrap();
        let elem = Element {
            timestamp: 100,
            peer_address: Address::from_str("192.0.2.1").unwrap(),
            peer_asn: 65001,
            kind: ElementKind::Withdraw { prefix },
        };
        assert_eq!(elem.prefix(), Some(prefix));
        assert_eq!(elem.aspath(), None);
    }

    fn roundtrip(elem: Element) {
        let mut buf = BytesMut::new();
        elem.encode(&mut buf);
        let mut frozen = buf.freeze();
        let decoded = Element::decode(&mut frozen).unwrap();
        assert_eq!(decoded, elem);
    }

    #[test]
    fn test_roundtrip_rib_with_aspath_and_nexthop() {
        roundtrip(Element {
            timestamp: 120,
            peer_address: Address::from_str("192.0.2.1").unwrap(),
            peer_asn: 65001,
            kind: ElementKind::Rib {
                prefix: Prefix::from_str("10.0.0.0/24").unwrap(),
                nexthop: Some(Address::from_str("192.0.2.254").unwrap()),
                aspath: crate::models::bgp::AsPath::from_sequence([65001, 65002]),
            },
        });
    }

    #[test]
    fn test_roundtrip_withdraw_v6() {
        roundtrip(Element {
            timestamp: 120,
            peer_address: Address::from_str("2001:db8::1").unwrap(),
            peer_asn: 65001,
            kind: ElementKind::Withdraw {
                prefix: Prefix::from_str("2001:db8:1::/48").unwrap(),
            },
        });
    }

    #[test]
    fn test_roundtrip_peer_state() {
        roundtrip(Element {
            timestamp: 120,
            peer_address: Address::from_str("192.0.2.1").unwrap(),
            peer_asn: 65001,
            kind: ElementKind::PeerState {
                old_state: PeerFsmState::Established,
                new_state: PeerFsmState::Idle,
            },
        });
    }

    #[test]
    fn test_decode_truncated_is_malformed() {
        let mut buf = Bytes::from_static(&[0, 0, 0, 1]);
        assert!(Element::decode(&mut buf).is_err());
    }
}
