//! Per-peer finite-state machine and statistics (spec §4.C).
//!
//! Each peer within a store-view owns one of these: it tracks the peer's
//! BGP session state, the counters that drive completion (expected vs.
//! received prefix-table counts), and the counters that drive the
//! full-feed-threshold check.

use crate::config::Config;
use crate::models::bgp::{ElementKind, PeerFsmState};

/// Per-peer FSM and statistics, scoped to a single store-view.
#[derive(Debug, Clone)]
pub struct PeerFsm {
    state: PeerFsmState,
    expected_pfx_table_cnt: u32,
    received_pfx_table_cnt: u32,
    received_v4_cnt: u64,
    received_v6_cnt: u64,
    out_of_order_cnt: u64,
    /// Highest element timestamp applied so far; used to detect
    /// out-of-order announcements/withdrawals arriving after the RIB
    /// boundary has moved on (scenario S4).
    most_recent_ts: u32,
    /// Set on the first RIB row seen for the current table dump; cleared
    /// whenever the FSM leaves `Established`, so a fresh RIB must start
    /// with another row to re-arm the expected-count increment.
    rib_started: bool,
    /// Set when the session drops out of `Established` while a RIB dump is
    /// still in progress (spec §8 S5). While set, `Rib` rows are ignored
    /// rather than silently re-establishing the peer; only an explicit
    /// `PeerState` transition back to `Established` clears it.
    rib_abandoned: bool,
}

impl Default for PeerFsm {
    fn default() -> Self {
        PeerFsm {
            state: PeerFsmState::Unknown,
            expected_pfx_table_cnt: 0,
            received_pfx_table_cnt: 0,
            received_v4_cnt: 0,
            received_v6_cnt: 0,
            out_of_order_cnt: 0,
            most_recent_ts: 0,
            rib_started: false,
            rib_abandoned: false,
        }
    }
}

/// Outcome of feeding an element to the FSM: whether the row should be
/// applied to the view, or was rejected/ignored and why.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementOutcome {
    Apply,
    IgnoredNotEstablished,
    IgnoredOutOfOrder,
    StateChanged,
}

impl PeerFsm {
    pub fn new() -> Self {
        PeerFsm::default()
    }

    pub fn state(&self) -> PeerFsmState {
        self.state
    }

    pub fn is_done(&self) -> bool {
        self.expected_pfx_table_cnt > 0
            && self.received_pfx_table_cnt == self.expected_pfx_table_cnt
    }

    pub fn out_of_order_count(&self) -> u64 {
        self.out_of_order_cnt
    }

    pub fn is_full_feed(&self, config: &Config) -> bool {
        self.received_v4_cnt > config.full_feed_threshold_v4
            || self.received_v6_cnt > config.full_feed_threshold_v6
    }

    /// Feeds one element's worth of information to the FSM and reports
    /// whether the caller should go on to apply it to the view.
    pub fn observe(&mut self, timestamp: u32, kind: &ElementKind) -> ElementOutcome {
        match kind {
            ElementKind::Rib { prefix, .. } => {
                if self.rib_abandoned {
                    return ElementOutcome::IgnoredNotEstablished;
                }
                self.state = PeerFsmState::Established;
                if !self.rib_started {
                    self.rib_started = true;
                    self.expected_pfx_table_cnt += 1;
                }
                self.most_recent_ts = self.most_recent_ts.max(timestamp);
                self.count_prefix(prefix.is_ipv4());
                ElementOutcome::Apply
            }
            ElementKind::Announce { prefix, .. } => {
                if self.state != PeerFsmState::Established {
                    return ElementOutcome::IgnoredNotEstablished;
                }
                if timestamp < self.most_recent_ts {
                    self.out_of_order_cnt += 1;
                    return ElementOutcome::IgnoredOutOfOrder;
                }
                self.most_recent_ts = timestamp;
                self.count_prefix(prefix.is_ipv4());
                ElementOutcome::Apply
            }
            ElementKind::Withdraw { prefix } => {
                if self.state != PeerFsmState::Established {
                    return ElementOutcome::IgnoredNotEstablished;
                }
                if timestamp < self.most_recent_ts {
                    self.out_of_order_cnt += 1;
                    return ElementOutcome::IgnoredOutOfOrder;
                }
                self.most_recent_ts = timestamp;
                let _ = prefix;
                ElementOutcome::Apply
            }
            ElementKind::PeerState { new_state, .. } => {
                let leaving_established_mid_rib =
                    self.state == PeerFsmState::Established && self.rib_started;
                self.state = *new_state;
                if *new_state != PeerFsmState::Established {
                    // Leaving Established mid-RIB: the in-progress table's
                    // rows are abandoned; a fresh Established transition is
                    // required before expected-count bookkeeping resumes,
                    // and until then, Rib rows are ignored (spec §8 S5)
                    // rather than silently re-establishing the peer.
                    self.rib_started = false;
                    if leaving_established_mid_rib {
                        self.rib_abandoned = true;
                    }
                } else {
                    self.rib_abandoned = false;
                }
                ElementOutcome::StateChanged
            }
        }
    }

    /// Records a `TableEnd` for this peer, driving completion.
    pub fn table_end(&mut self) {
        self.received_pfx_table_cnt += 1;
        self.rib_started = false;
    }

    fn count_prefix(&mut self, is_v4: bool) {
        if is_v4 {
            self.received_v4_cnt += 1;
        } else {
            self.received_v6_cnt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::network::{Address, Prefix};
    use std::str::FromStr;

    fn rib_row(addr: &str) -> ElementKind {
        ElementKind::Rib {
            prefix: Prefix::from_str(addr).unwrap(),
            nexthop: None,
            aspath: Default::default(),
        }
    }

    #[test]
    fn test_rib_row_establishes_peer() {
        let mut fsm = PeerFsm::new();
        assert_eq!(fsm.observe(100, &rib_row("10.0.0.0/24")), ElementOutcome::Apply);
        assert_eq!(fsm.state(), PeerFsmState::Established);
        assert_eq!(fsm.expected_pfx_table_cnt, 1);
    }

    #[test]
    fn test_done_when_received_equals_expected() {
        let mut fsm = PeerFsm::new();
        fsm.observe(100, &rib_row("10.0.0.0/24"));
        assert!(!fsm.is_done());
        fsm.table_end();
        assert!(fsm.is_done());
    }

    #[test]
    fn test_announce_requires_established() {
        let mut fsm = PeerFsm::new();
        let announce = ElementKind::Announce {
            prefix: Prefix::from_str("10.0.0.0/24").unwrap(),
            nexthop: None,
            aspath: Default::default(),
        };
        assert_eq!(fsm.observe(100, &announce), ElementOutcome::IgnoredNotEstablished);
    }

    #[test]
    fn test_out_of_order_not_applied() {
        let mut fsm = PeerFsm::new();
        fsm.observe(120, &rib_row("10.0.0.0/24"));
        fsm.table_end();
        fsm.observe(121, &ElementKind::Announce {
            prefix: Prefix::from_str("10.0.1.0/24").unwrap(),
            nexthop: None,
            aspath: Default::default(),
        });
        let before = fsm.received_v4_cnt;
        let outcome = fsm.observe(110, &ElementKind::Announce {
            prefix: Prefix::from_str("10.0.2.0/24").unwrap(),
            nexthop: None,
            aspath: Default::default(),
        });
        assert_eq!(outcome, ElementOutcome::IgnoredOutOfOrder);
        assert_eq!(fsm.out_of_order_count(), 1);
        assert_eq!(fsm.received_v4_cnt, before);
    }

    /// S5 -- a peer that drops out of `Established` mid-RIB has its
    /// remaining rows ignored; a fresh `Established` transition is required
    /// before rows apply and expected-count tracking resumes.
    #[test]
    fn test_peer_idle_mid_rib_ignores_rows_until_reestablished() {
        let mut fsm = PeerFsm::new();
        fsm.observe(100, &rib_row("10.0.0.0/24"));
        fsm.observe(
            105,
            &ElementKind::PeerState {
                old_state: PeerFsmState::Established,
                new_state: PeerFsmState::Idle,
            },
        );
        assert_eq!(fsm.state(), PeerFsmState::Idle);

        // rows for the abandoned RIB are ignored, not silently re-applied
        assert_eq!(
            fsm.observe(106, &rib_row("10.0.1.0/24")),
            ElementOutcome::IgnoredNotEstablished
        );
        assert_eq!(fsm.state(), PeerFsmState::Idle);
        assert_eq!(fsm.expected_pfx_table_cnt, 1);
        assert_eq!(fsm.received_v4_cnt, 1);

        // an explicit Established transition lets RIB rows apply again
        fsm.observe(
            110,
            &ElementKind::PeerState {
                old_state: PeerFsmState::Idle,
                new_state: PeerFsmState::Established,
            },
        );
        assert_eq!(
            fsm.observe(111, &rib_row("10.0.2.0/24")),
            ElementOutcome::Apply
        );
        assert_eq!(fsm.expected_pfx_table_cnt, 2);
    }

    #[test]
    fn test_full_feed_threshold() {
        let mut fsm = PeerFsm::new();
        let config = Config {
            full_feed_threshold_v4: 2,
            ..Config::default()
        };
        fsm.observe(1, &rib_row("10.0.0.0/24"));
        fsm.observe(1, &rib_row("10.0.1.0/24"));
        assert!(!fsm.is_full_feed(&config));
        fsm.observe(1, &rib_row("10.0.2.0/24"));
        assert!(fsm.is_full_feed(&config));
    }

    #[allow(unused)]
    fn _addr(s: &str) -> Address {
        Address::from_str(s).unwrap()
    }
}
