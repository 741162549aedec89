//! Runtime configuration for the view store and wire protocol.

use std::time::Duration;

/// All tunable knobs for the view-store service: window sizing, full-feed
/// thresholds, reuse limits, and the wire-protocol defaults from spec §6.
///
/// `(De)serializable` via `serde` so the CLI (or any embedder) can load a
/// config file; `Default` reproduces the exact defaults the specification
/// calls out.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct Config {
    /// Bucket size B, in seconds: the granularity of view time alignment.
    pub bucket_size_secs: u32,
    /// Window length W, in buckets: how many views the store keeps at once.
    pub window_len: u32,
    /// Max wall-clock age, in seconds, before a view is force-dispatched.
    pub view_timeout_secs: u64,
    /// Full-feed threshold: received v4 prefix count above which a peer is
    /// considered a full-feed peer.
    pub full_feed_threshold_v4: u64,
    /// Full-feed threshold for v6.
    pub full_feed_threshold_v6: u64,
    /// Forced slot reconstruction interval: every `reuse_max` clears, a slot
    /// is destroyed and rebuilt from scratch to shed accumulated bookkeeping.
    pub reuse_max: u32,
    /// Whether `Partial` dispatches are published at all, or only
    /// `FirstFull`/`Full` (legacy behavior). See spec §9's open question.
    pub publish_partial: bool,

    /// Wire protocol: server bind/connect URI.
    pub server_uri: String,
    /// Heartbeat interval.
    pub heartbeat_interval: Duration,
    /// Missed heartbeats before a connection is considered dead.
    pub heartbeat_liveness: u32,
    /// Reconnect backoff bounds.
    pub reconnect_min: Duration,
    pub reconnect_max: Duration,
    /// Per-request timeout and retry count on the client broker.
    pub request_timeout: Duration,
    pub request_retries: u32,
    /// How long the broker flushes outstanding requests after `Term` before
    /// exiting unconditionally.
    pub shutdown_linger: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bucket_size_secs: 60,
            window_len: 30,
            view_timeout_secs: 3600,
            full_feed_threshold_v4: 400_000,
            full_feed_threshold_v6: 10_000,
            reuse_max: 1024,
            publish_partial: true,
            server_uri: "tcp://127.0.0.1:6300".to_string(),
            heartbeat_interval: Duration::from_millis(2000),
            heartbeat_liveness: 3,
            reconnect_min: Duration::from_millis(1000),
            reconnect_max: Duration::from_millis(32000),
            request_timeout: Duration::from_millis(2500),
            request_retries: 3,
            shutdown_linger: Duration::from_millis(2000),
        }
    }
}

impl Config {
    /// Window span in seconds: `W * B`.
    pub fn window_span_secs(&self) -> u64 {
        self.window_len as u64 * self.bucket_size_secs as u64
    }

    /// Rounds `bgp_time` down to the nearest bucket boundary.
    pub fn truncate_to_bucket(&self, bgp_time: u32) -> u32 {
        bgp_time - (bgp_time % self.bucket_size_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_matches_spec() {
        let cfg = Config::default();
        assert_eq!(cfg.bucket_size_secs, 60);
        assert_eq!(cfg.window_len, 30);
        assert_eq!(cfg.view_timeout_secs, 3600);
        assert_eq!(cfg.full_feed_threshold_v4, 400_000);
        assert_eq!(cfg.full_feed_threshold_v6, 10_000);
        assert_eq!(cfg.server_uri, "tcp://127.0.0.1:6300");
        assert_eq!(cfg.heartbeat_liveness, 3);
        assert_eq!(cfg.request_retries, 3);
    }

    #[test]
    fn test_truncate_to_bucket() {
        let cfg = Config::default();
        assert_eq!(cfg.truncate_to_bucket(125), 120);
        assert_eq!(cfg.truncate_to_bucket(120), 120);
    }

    #[test]
    #[cfg(feature = "serde")]
    fn test_serde_roundtrip() {
        let cfg = Config::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let back: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg, back);
    }
}
