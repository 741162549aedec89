//! View wire serialization (spec §4.H): peers then v4 prefixes then v6
//! prefixes, each as a length-counted block, terminated by a zero-length
//! sentinel frame so a streaming reader can detect the end without
//! buffering the whole message.

use crate::error::{ViewStoreError, ViewStoreResult};
use crate::models::network::{Address, PeerId, PeerSignature, Prefix};
use crate::registry::PeerSignatureRegistry;
use crate::view::View;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use itertools::Itertools;
use std::net::{Ipv4Addr, Ipv6Addr};

const SENTINEL: u32 = 0;

/// Encodes `view` into the wire layout, resolving peer ids against
/// `registry`. Only peers that actually contribute at least one prefix to
/// this view are included in the peers block.
pub fn encode_view(view: &View, registry: &PeerSignatureRegistry) -> Bytes {
    let mut buf = BytesMut::new();
    buf.put_u32(view.bgp_time);
    buf.put_u32(view.wall_time_created.sec);
    buf.put_u32(view.wall_time_created.usec);

    // sorted by id so two encodings of the same view are byte-identical
    // regardless of the backing HashMap's iteration order.
    let peers: Vec<(PeerId, &PeerSignature)> = view
        .iter_peers()
        .filter(|(_, info)| info.v4_pfx_cnt > 0 || info.v6_pfx_cnt > 0)
        .filter_map(|(id, _)| registry.get_by_id(id).map(|sig| (id, sig)))
        .sorted_by_key(|(id, _)| id.0)
        .collect();

    buf.put_u16(peers.len() as u16);
    for (id, sig) in &peers {
        buf.put_u16(id.0);
        put_string(&mut buf, sig.collector());
        put_address(&mut buf, &sig.peer_ip());
    }

    encode_prefix_block(&mut buf, view.iter_v4_prefixes());
    encode_prefix_block(&mut buf, view.iter_v6_prefixes());

    buf.put_u32(SENTINEL);
    buf.freeze()
}

fn encode_prefix_block<'a>(
    buf: &mut BytesMut,
    prefixes: impl Iterator<Item = (&'a Prefix, &'a crate::view::PfxPeerTable)>,
) {
    let entries: Vec<_> = prefixes
        .sorted_by_key(|(pfx, _)| (pfx.address().octets(), pfx.prefix_len()))
        .collect();
    buf.put_u32(entries.len() as u32);
    for (pfx, table) in entries {
        put_address_bytes_only(buf, &pfx.address());
        buf.put_u8(pfx.prefix_len());
        let live: Vec<_> = table.iter().sorted_by_key(|(id, _)| id.0).collect();
        buf.put_u16(live.len() as u16);
        for (peer_id, info) in live {
            buf.put_u16(peer_id.0);
            buf.put_u32(info.origin_asn);
        }
    }
}

/// Decodes a view frame, reconstructing peer bindings into `registry` via
/// `set(id, ..)` (not `set_and_get`) so decoded ids match the sender's.
pub fn decode_view(buf: &mut Bytes, registry: &mut PeerSignatureRegistry) -> ViewStoreResult<View> {
    require(buf, 12)?;
    let bgp_time = buf.get_u32();
    let wall_sec = buf.get_u32();
    let wall_usec = buf.get_u32();

    let mut view = View::new();
    view.bgp_time = bgp_time;
    view.wall_time_created = crate::view::WallTime {
        sec: wall_sec,
        usec: wall_usec,
    };

    require(buf, 2)?;
    let peer_count = buf.get_u16();
    for _ in 0..peer_count {
        require(buf, 2)?;
        let id = PeerId(buf.get_u16());
        let collector = get_string(buf)?;
        let peer_ip = get_address(buf)?;
        let signature = PeerSignature::new(&collector, peer_ip)
            .ok_or_else(|| ViewStoreError::Malformed("collector name too long".to_string()))?;
        registry.set(id, signature)?;
    }

    decode_prefix_block(buf, &mut view, true)?;
    decode_prefix_block(buf, &mut view, false)?;

    require(buf, 4)?;
    let sentinel = buf.get_u32();
    if sentinel != SENTINEL {
        return Err(ViewStoreError::Malformed(
            "missing view sentinel frame".to_string(),
        ));
    }

    Ok(view)
}

fn decode_prefix_block(buf: &mut Bytes, view: &mut View, is_v4: bool) -> ViewStoreResult<()> {
    require(buf, 4)?;
    let count = buf.get_u32();
    for _ in 0..count {
        let address = if is_v4 {
            require(buf, 4)?;
            let mut octets = [0u8; 4];
            buf.copy_to_slice(&mut octets);
            Address::V4(Ipv4Addr::from(octets))
        } else {
            require(buf, 16)?;
            let mut octets = [0u8; 16];
            buf.copy_to_slice(&mut octets);
            Address::V6(Ipv6Addr::from(octets))
        };
        require(buf, 1)?;
        let prefix_len = buf.get_u8();
        if prefix_len > address.family_bits() {
            return Err(ViewStoreError::Malformed(
                "prefix length exceeds address family width".to_string(),
            ));
        }
        let pfx = Prefix::new(address, prefix_len);

        require(buf, 2)?;
        let peers_count = buf.get_u16();
        let mut rows = Vec::with_capacity(peers_count as usize);
        for _ in 0..peers_count {
            require(buf, 6)?;
            let peer_id = PeerId(buf.get_u16());
            let origin_asn = buf.get_u32();
            rows.push((peer_id, origin_asn));
        }
        view.add_prefix_run(pfx, rows);
    }
    Ok(())
}

fn require(buf: &Bytes, n: usize) -> ViewStoreResult<()> {
    if buf.remaining() < n {
        return Err(ViewStoreError::Malformed(
            "truncated view frame".to_string(),
        ));
    }
    Ok(())
}

fn put_string(buf: &mut BytesMut, s: &str) {
    buf.put_u16(s.len() as u16);
    buf.put_slice(s.as_bytes());
}

fn get_string(buf: &mut Bytes) -> ViewStoreResult<String> {
    require(buf, 2)?;
    let len = buf.get_u16() as usize;
    require(buf, len)?;
    let bytes = buf.split_to(len);
    String::from_utf8(bytes.to_vec()).map_err(|e| ViewStoreError::Malformed(e.to_string()))
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

fn put_address_bytes_only(buf: &mut BytesMut, addr: &Address) {
    match addr {
        Address::V4(v4) => buf.put_slice(&v4.octets()),
        Address::V6(v6) => buf.put_slice(&v6.octets()),
    }
}

fn get_address(buf: &mut Bytes) -> ViewStoreResult<Address> {
    require(buf, 1)?;
    match buf.get_u8() {
        4 => {
            require(buf, 4)?;
            let mut octets = [0u8; 4];
            buf.copy_to_slice(&mut octets);
            Ok(Address::V4(Ipv4Addr::from(octets)))
        }
        6 => {
            require(buf, 16)?;
            let mut octets = [0u8; 16];
            buf.copy_to_slice(&mut octets);
            Ok(Address::V6(Ipv6Addr::from(octets)))
        }
        other => Err(ViewStoreError::Malformed(format!(
            "unknown address family tag {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn sig(collector: &str, ip: &str) -> PeerSignature {
        PeerSignature::new(collector, Address::from_str(ip).unwrap()).unwrap()
    }

    #[test]
    fn test_roundtrip_empty_view() {
        let mut registry = PeerSignatureRegistry::new();
        let mut view = View::new();
        view.bgp_time = 120;

        let bytes = encode_view(&view, &registry);
        let mut cursor = bytes;
        let decoded = decode_view(&mut cursor, &mut registry).unwrap();
        assert_eq!(decoded.bgp_time, 120);
        assert_eq!(decoded.iter_v4_prefixes().count(), 0);
    }

    #[test]
    fn test_roundtrip_preserves_peer_ids() {
        let mut sender_registry = PeerSignatureRegistry::new();
        let id1 = sender_registry.set_and_get(sig("rrc01", "192.0.2.1")).unwrap();
        let id2 = sender_registry.set_and_get(sig("rrc01", "2001:db8::1")).unwrap();

        let mut view = View::new();
        view.bgp_time = 60;
        view.add_prefix(Prefix::from_str("10.0.0.0/24").unwrap(), id1, 65001);
        view.add_prefix(Prefix::from_str("2001:db8:1::/48").unwrap(), id2, 65002);

        let bytes = encode_view(&view, &sender_registry);

        let mut receiver_registry = PeerSignatureRegistry::new();
        let mut cursor = bytes;
        let decoded = decode_view(&mut cursor, &mut receiver_registry).unwrap();

        assert_eq!(decoded.bgp_time, 60);
        assert_eq!(receiver_registry.get_by_id(id1), Some(&sig("rrc01", "192.0.2.1")));
        assert_eq!(decoded.iter_v4_prefixes().count(), 1);
        assert_eq!(decoded.iter_v6_prefixes().count(), 1);
    }

    #[test]
    fn test_decode_rejects_conflicting_peer_id() {
        let mut sender_registry = PeerSignatureRegistry::new();
        sender_registry.set(PeerId(3), sig("rrc02", "192.0.2.9")).unwrap();
        let mut view = View::new();
        view.add_prefix(Prefix::from_str("10.0.0.0/24").unwrap(), PeerId(3), 65000);
        let bytes = encode_view(&view, &sender_registry);

        let mut registry = PeerSignatureRegistry::new();
        registry.set(PeerId(3), sig("rrc01", "192.0.2.1")).unwrap();

        let mut cursor = bytes;
        let result = decode_view(&mut cursor, &mut registry);
        assert!(result.is_err());
        assert_eq!(registry.get_by_id(PeerId(3)), Some(&sig("rrc01", "192.0.2.1")));
    }
}
