//! View: a snapshot of all peers' RIBs at one BGP-time bucket (spec §4.D).

use crate::models::network::{PeerId, Prefix};
use std::collections::HashMap;

/// Wall-clock moment a view was (re)created, as seconds/microseconds since
/// the epoch -- matches the wire layout in §4.H directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WallTime {
    pub sec: u32,
    pub usec: u32,
}

impl WallTime {
    /// The current wall-clock time, truncated to fit the wire format's
    /// 32-bit seconds/microseconds fields.
    pub fn now() -> WallTime {
        let elapsed = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default();
        WallTime {
            sec: elapsed.as_secs() as u32,
            usec: elapsed.subsec_micros(),
        }
    }
}

/// `{origin-asn, in-use}` for one peer within one prefix's table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PfxPeerInfo {
    pub origin_asn: u32,
    in_use: bool,
}

/// Per-prefix table of contributing peers, plus an active count that
/// implements the lazy clear described in spec §4.D / §9: when
/// `active_count == 0`, every cell is semantically `in_use = false`
/// regardless of what the map actually contains, and the next `add_prefix`
/// touching this table must walk it once to make that real before
/// inserting.
#[derive(Debug, Clone, Default)]
pub struct PfxPeerTable {
    peers: HashMap<PeerId, PfxPeerInfo>,
    active_count: u32,
}

impl PfxPeerTable {
    pub fn active_count(&self) -> u32 {
        self.active_count
    }

    pub fn get(&self, peer_id: PeerId) -> Option<&PfxPeerInfo> {
        if self.active_count == 0 {
            return None;
        }
        self.peers.get(&peer_id).filter(|p| p.in_use)
    }

    /// Live (in_use) peers in this table.
    pub fn iter(&self) -> impl Iterator<Item = (PeerId, &PfxPeerInfo)> {
        let live = self.active_count > 0;
        self.peers
            .iter()
            .filter(move |(_, info)| live && info.in_use)
            .map(|(id, info)| (*id, info))
    }

    fn lazy_reset_if_needed(&mut self) {
        if self.active_count == 0 {
            for info in self.peers.values_mut() {
                info.in_use = false;
            }
        }
    }
}

/// Per-peer prefix counts within a view, used both for the "view count
/// consistency" invariant and for completion/full-feed bookkeeping upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PeerViewInfo {
    pub v4_pfx_cnt: u32,
    pub v6_pfx_cnt: u32,
}

/// A snapshot of all peers' RIBs for one BGP-time bucket.
///
/// Unlike the legacy C implementation's raw back-pointer into a shared
/// peer-signature registry, this type does not hold a borrowed reference to
/// one: the store (the single owner of both the registry and every view)
/// passes `&PeerSignatureRegistry` into the operations that need it
/// (serialization, display). This sidesteps a self-referential
/// `ViewStore` while preserving the spec's invariant that a view never
/// frees the registry -- it simply never owns a reference to it at all.
#[derive(Debug, Clone, Default)]
pub struct View {
    pub bgp_time: u32,
    pub wall_time_created: WallTime,
    v4pfxs: HashMap<Prefix, PfxPeerTable>,
    v6pfxs: HashMap<Prefix, PfxPeerTable>,
    peer_info: HashMap<PeerId, PeerViewInfo>,
}

impl View {
    pub fn new() -> Self {
        View::default()
    }

    fn table(&self, pfx: &Prefix) -> &HashMap<Prefix, PfxPeerTable> {
        if pfx.is_ipv4() {
            &self.v4pfxs
        } else {
            &self.v6pfxs
        }
    }

    /// Applies one `(prefix, peer, info)` row to the view. See spec §4.D
    /// for the full algorithm; applying the same row twice is a no-op
    /// beyond the first time (idempotent add-prefix, spec §8 invariant 8).
    pub fn add_prefix(&mut self, pfx: Prefix, peer_id: PeerId, origin_asn: u32) {
        self.add_prefix_run(pfx, std::iter::once((peer_id, origin_asn)));
    }

    /// Applies a run of rows that all target the same prefix with a single
    /// top-level hash lookup for the prefix, per spec §4.D's cache-hint
    /// ("lets a sequence of rows for the same prefix bypass the per-row
    /// hash lookup"). This is how a decoded view's peers-block -- which
    /// already groups all of one prefix's peer rows together on the wire
    /// -- is applied; see `wire::serialize::decode_prefix_block`.
    pub fn add_prefix_run<I>(&mut self, pfx: Prefix, rows: I)
    where
        I: IntoIterator<Item = (PeerId, u32)>,
    {
        let is_v4 = pfx.is_ipv4();
        let tables = if is_v4 { &mut self.v4pfxs } else { &mut self.v6pfxs };
        let table = tables.entry(pfx).or_default();
        table.lazy_reset_if_needed();

        let mut newly_active: Vec<PeerId> = Vec::new();
        for (peer_id, origin_asn) in rows {
            let transitioned_to_in_use = match table.peers.get_mut(&peer_id) {
                Some(existing) => {
                    let was_in_use = existing.in_use;
                    existing.origin_asn = origin_asn;
                    existing.in_use = true;
                    !was_in_use
                }
                None => {
                    table.peers.insert(
                        peer_id,
                        PfxPeerInfo {
                            origin_asn,
                            in_use: true,
                        },
                    );
                    true
                }
            };
            if transitioned_to_in_use {
                table.active_count += 1;
                newly_active.push(peer_id);
            }
        }

        // `table`'s borrow of `self.v4pfxs`/`self.v6pfxs` ends above, so
        // `self.peer_info` can be borrowed independently here.
        for peer_id in newly_active {
            let peer_info = self.peer_info.entry(peer_id).or_default();
            if is_v4 {
                peer_info.v4_pfx_cnt += 1;
            } else {
                peer_info.v6_pfx_cnt += 1;
            }
        }
    }

    /// Removes `peer_id`'s contribution to `pfx`, if present and in-use.
    pub fn withdraw_prefix(&mut self, pfx: Prefix, peer_id: PeerId) {
        let is_v4 = pfx.is_ipv4();
        let tables = if is_v4 { &mut self.v4pfxs } else { &mut self.v6pfxs };
        let Some(table) = tables.get_mut(&pfx) else {
            return;
        };
        if table.active_count == 0 {
            return;
        }
        let went_inactive = if let Some(info) = table.peers.get_mut(&peer_id) {
            if info.in_use {
                info.in_use = false;
                table.active_count -= 1;
                true
            } else {
                false
            }
        } else {
            false
        };

        // `table`'s borrow of `self.v4pfxs`/`self.v6pfxs` ends above, so
        // `self.peer_info` can be borrowed independently here.
        if went_inactive {
            if let Some(peer_info) = self.peer_info.get_mut(&peer_id) {
                if is_v4 {
                    peer_info.v4_pfx_cnt = peer_info.v4_pfx_cnt.saturating_sub(1);
                } else {
                    peer_info.v6_pfx_cnt = peer_info.v6_pfx_cnt.saturating_sub(1);
                }
            }
        }
    }

    /// Resets the view for reuse, per spec §4.D: `bgp_time = 0`, every
    /// per-pfx table's `active_count` set to zero (lazy clear), and
    /// `peer_info` emptied. The top-level hash buckets and per-pfx tables
    /// themselves are retained for the next bucket's inserts.
    pub fn clear(&mut self) {
        self.bgp_time = 0;
        self.wall_time_created = WallTime::default();
        for table in self.v4pfxs.values_mut() {
            table.active_count = 0;
        }
        for table in self.v6pfxs.values_mut() {
            table.active_count = 0;
        }
        self.peer_info.clear();
    }

    pub fn peer_info(&self, peer_id: PeerId) -> Option<&PeerViewInfo> {
        self.peer_info.get(&peer_id)
    }

    pub fn peer_count(&self) -> usize {
        self.peer_info.len()
    }

    pub fn iter_peers(&self) -> impl Iterator<Item = (PeerId, &PeerViewInfo)> {
        self.peer_info.iter().map(|(id, info)| (*id, info))
    }

    /// Live v4 prefixes: those whose per-pfx table has `active_count > 0`.
    pub fn iter_v4_prefixes(&self) -> impl Iterator<Item = (&Prefix, &PfxPeerTable)> {
        self.v4pfxs.iter().filter(|(_, t)| t.active_count > 0)
    }

    pub fn iter_v6_prefixes(&self) -> impl Iterator<Item = (&Prefix, &PfxPeerTable)> {
        self.v6pfxs.iter().filter(|(_, t)| t.active_count > 0)
    }

    /// Sub-iterator over the live peers of one prefix. Asserts the prefix
    /// belongs to a live top-level entry, per spec §4.D's "sub-iteration
    /// asserts that the corresponding top-level iterator is valid."
    pub fn iter_prefix_peers(&self, pfx: &Prefix) -> impl Iterator<Item = (PeerId, &PfxPeerInfo)> {
        let table = self.table(pfx).get(pfx);
        assert!(
            table.is_some_and(|t| t.active_count > 0),
            "iter_prefix_peers called on a prefix with no live entry"
        );
        table.into_iter().flat_map(|t| t.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn pfx(s: &str) -> Prefix {
        Prefix::from_str(s).unwrap()
    }

    #[test]
    fn test_add_prefix_counts() {
        let mut view = View::new();
        view.add_prefix(pfx("10.0.0.0/24"), PeerId(1), 65001);
        assert_eq!(view.peer_info(PeerId(1)).unwrap().v4_pfx_cnt, 1);
        assert_eq!(view.iter_v4_prefixes().count(), 1);
    }

    #[test]
    fn test_idempotent_add_prefix() {
        let mut view = View::new();
        view.add_prefix(pfx("10.0.0.0/24"), PeerId(1), 65001);
        view.add_prefix(pfx("10.0.0.0/24"), PeerId(1), 65001);
        assert_eq!(view.peer_info(PeerId(1)).unwrap().v4_pfx_cnt, 1);
    }

    #[test]
    fn test_clear_then_reuse_lazy() {
        let mut view = View::new();
        view.add_prefix(pfx("10.0.0.0/24"), PeerId(1), 65001);
        view.clear();
        assert_eq!(view.iter_v4_prefixes().count(), 0);
        assert_eq!(view.peer_count(), 0);

        // re-adding a different peer for the same prefix must not see the
        // stale entry from before the clear
        view.add_prefix(pfx("10.0.0.0/24"), PeerId(2), 65002);
        let live: Vec<_> = view.iter_prefix_peers(&pfx("10.0.0.0/24")).collect();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].0, PeerId(2));
    }

    #[test]
    fn test_withdraw_removes_from_iteration() {
        let mut view = View::new();
        view.add_prefix(pfx("10.0.0.0/24"), PeerId(1), 65001);
        view.withdraw_prefix(pfx("10.0.0.0/24"), PeerId(1));
        assert_eq!(view.iter_v4_prefixes().count(), 0);
        assert_eq!(view.peer_info(PeerId(1)).unwrap().v4_pfx_cnt, 0);
    }

    #[test]
    fn test_v4_v6_separate_families() {
        let mut view = View::new();
        view.add_prefix(pfx("10.0.0.0/24"), PeerId(1), 65001);
        view.add_prefix(pfx("2001:db8::/32"), PeerId(1), 65001);
        assert_eq!(view.iter_v4_prefixes().count(), 1);
        assert_eq!(view.iter_v6_prefixes().count(), 1);
        let info = view.peer_info(PeerId(1)).unwrap();
        assert_eq!(info.v4_pfx_cnt, 1);
        assert_eq!(info.v6_pfx_cnt, 1);
    }
}
