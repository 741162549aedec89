//! Client side of the wire protocol: a broker task that owns the connection
//! to the server, retransmits requests that go unanswered, and reconnects
//! with exponential backoff on failure (spec §4.G).
//!
//! Callers interact with the broker entirely through channels -- a command
//! channel carries outgoing requests in, an inbox channel carries
//! server-pushed messages (chiefly [`Message::Publish`]) out -- matching
//! spec §9's "broker lifecycle is easier with message passing than with
//! shared state."

use std::collections::HashMap;
use std::time::Instant;

use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_util::codec::Framed;

use crate::config::Config;
use crate::error::{ViewStoreError, ViewStoreResult};
use crate::wire::message::{ClientInterest, DataFrame, Message, ReplyFrame};
use crate::wire::MessageCodec;

/// A request submitted to the broker for delivery. `SendData` completes its
/// `reply` channel once a matching `Reply` arrives or retries are exhausted.
pub enum BrokerCommand {
    SendData {
        frame: DataFrame,
        reply: oneshot::Sender<ViewStoreResult<ReplyFrame>>,
    },
    Shutdown,
}

/// One outstanding request: the frame to retransmit, how many attempts are
/// left, and when the next attempt is due.
struct PendingRequest {
    frame: DataFrame,
    retries_remaining: u32,
    retry_at: Instant,
    reply: oneshot::Sender<ViewStoreResult<ReplyFrame>>,
}

/// Broker identity and tunables. `run` drives the reconnect loop until the
/// command channel is closed or a `Shutdown` is processed.
pub struct Broker {
    name: String,
    interest: ClientInterest,
    config: Config,
}

impl Broker {
    pub fn new(name: impl Into<String>, interest: ClientInterest, config: Config) -> Self {
        Broker {
            name: name.into(),
            interest,
            config,
        }
    }

    /// Runs until `commands` closes or `Shutdown` is received. Inbound
    /// messages other than `Reply`/`Heartbeat`/`Term` (i.e. `Publish`) are
    /// forwarded on `inbox`.
    pub async fn run(
        &self,
        server_uri: &str,
        inbox: mpsc::UnboundedSender<Message>,
        mut commands: mpsc::UnboundedReceiver<BrokerCommand>,
    ) {
        let addr = strip_scheme(server_uri);
        let mut backoff = self.config.reconnect_min;
        // Outstanding requests survive across reconnects: a request
        // submitted while disconnected (or interrupted by a dropped
        // connection) is retransmitted once the next connection is ready.
        let mut pending: HashMap<u32, PendingRequest> = HashMap::new();
        let mut next_seq: u32 = 1;

        loop {
            debug!("connecting to {addr}");
            let stream = match TcpStream::connect(addr).await {
                Ok(s) => s,
                Err(e) => {
                    warn!("connect to {addr} failed: {e}");
                    tokio::time::sleep(backoff).await;
                    backoff = std::cmp::min(backoff * 2, self.config.reconnect_max);
                    continue;
                }
            };
            backoff = self.config.reconnect_min;

            let mut framed = Framed::new(stream, MessageCodec);
            if framed
                .send(Message::Ready {
                    client_name: self.name.clone(),
                    interest: self.interest,
                })
                .await
                .is_err()
            {
                continue;
            }
            info!("client '{}' connected and ready", self.name);

            for (seq, req) in pending.iter() {
                let _ = framed
                    .send(Message::Data {
                        seq: *seq,
                        frame: req.frame.clone(),
                    })
                    .await;
            }

            if !self
                .serve_connection(&mut framed, &inbox, &mut commands, &mut pending, &mut next_seq)
                .await
            {
                fail_all_pending(&mut pending);
                return;
            }
        }
    }

    /// Services one connection until it drops or a shutdown is requested.
    /// Returns `false` if the broker should stop entirely (command channel
    /// closed, or an explicit `Shutdown` was processed); `true` if the
    /// connection merely dropped and a reconnect should follow.
    async fn serve_connection(
        &self,
        framed: &mut Framed<TcpStream, MessageCodec>,
        inbox: &mpsc::UnboundedSender<Message>,
        commands: &mut mpsc::UnboundedReceiver<BrokerCommand>,
        pending: &mut HashMap<u32, PendingRequest>,
        next_seq: &mut u32,
    ) -> bool {
        let mut heartbeat = tokio::time::interval(self.config.heartbeat_interval);
        heartbeat.tick().await; // first tick fires immediately; consume it
        let mut missed_heartbeats: u32 = 0;
        let retry_period = std::cmp::min(self.config.request_timeout, self.config.heartbeat_interval);
        let mut retry_sweep = tokio::time::interval(retry_period);
        retry_sweep.tick().await;

        loop {
            tokio::select! {
                incoming = framed.next() => {
                    match incoming {
                        Some(Ok(msg)) => {
                            missed_heartbeats = 0;
                            match msg {
                                Message::Reply { seq, reply } => {
                                    if let Some(req) = pending.remove(&seq) {
                                        let _ = req.reply.send(Ok(reply));
                                    } else {
                                        debug!("client '{}' dropped reply for unknown seq {seq}", self.name);
                                    }
                                }
                                Message::Heartbeat => {}
                                Message::Term => {
                                    debug!("client '{}' received Term from server", self.name);
                                    return true;
                                }
                                other => {
                                    if inbox.send(other).is_err() {
                                        return false;
                                    }
                                }
                            }
                        }
                        Some(Err(e)) => {
                            warn!("client '{}' framing error: {e}", self.name);
                            return true;
                        }
                        None => {
                            debug!("client '{}' lost connection", self.name);
                            return true;
                        }
                    }
                }
                cmd = commands.recv() => {
                    match cmd {
                        Some(BrokerCommand::SendData { frame, reply }) => {
                            let seq = *next_seq;
                            *next_seq = next_seq.wrapping_add(1).max(1);
                            pending.insert(seq, PendingRequest {
                                frame: frame.clone(),
                                retries_remaining: self.config.request_retries,
                                retry_at: Instant::now() + self.config.request_timeout,
                                reply,
                            });
                            if framed.send(Message::Data { seq, frame }).await.is_err() {
                                return true;
                            }
                        }
                        Some(BrokerCommand::Shutdown) => {
                            let _ = framed.send(Message::Term).await;
                            self.linger(framed, pending).await;
                            return false;
                        }
                        None => {
                            let _ = framed.send(Message::Term).await;
                            return false;
                        }
                    }
                }
                _ = heartbeat.tick() => {
                    missed_heartbeats += 1;
                    if missed_heartbeats >= self.config.heartbeat_liveness {
                        warn!(
                            "client '{}' missed {missed_heartbeats} heartbeat intervals, reconnecting",
                            self.name
                        );
                        return true;
                    }
                    if framed.send(Message::Heartbeat).await.is_err() {
                        return true;
                    }
                }
                _ = retry_sweep.tick() => {
                    self.sweep_retries(framed, pending).await;
                }
            }
        }
    }

    /// Retransmits or fails every pending request whose `retry_at` has
    /// passed, per spec §4.G's `Ready` broker-state retry rule.
    async fn sweep_retries(
        &self,
        framed: &mut Framed<TcpStream, MessageCodec>,
        pending: &mut HashMap<u32, PendingRequest>,
    ) {
        let now = Instant::now();
        let due: Vec<u32> = pending
            .iter()
            .filter(|(_, req)| req.retry_at <= now)
            .map(|(seq, _)| *seq)
            .collect();

        for seq in due {
            let exhausted = {
                let req = pending.get(&seq).expect("seq collected above");
                req.retries_remaining == 0
            };
            if exhausted {
                if let Some(req) = pending.remove(&seq) {
                    let _ = req.reply.send(Err(ViewStoreError::Timeout));
                }
                continue;
            }
            let frame = {
                let req = pending.get_mut(&seq).expect("seq collected above");
                req.retries_remaining -= 1;
                req.retry_at = now + self.config.request_timeout;
                req.frame.clone()
            };
            if framed.send(Message::Data { seq, frame }).await.is_err() {
                break;
            }
        }
    }

    /// After sending `Term`, keeps draining replies for up to
    /// `shutdown_linger` before giving up on whatever is still outstanding.
    async fn linger(
        &self,
        framed: &mut Framed<TcpStream, MessageCodec>,
        pending: &mut HashMap<u32, PendingRequest>,
    ) {
        let deadline = tokio::time::sleep(self.config.shutdown_linger);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                _ = &mut deadline => break,
                incoming = framed.next() => {
                    match incoming {
                        Some(Ok(Message::Reply { seq, reply })) => {
                            if let Some(req) = pending.remove(&seq) {
                                let _ = req.reply.send(Ok(reply));
                            }
                        }
                        Some(Ok(_)) => {}
                        _ => break,
                    }
                }
            }
        }
    }
}

fn fail_all_pending(pending: &mut HashMap<u32, PendingRequest>) {
    for (_, req) in pending.drain() {
        let _ = req.reply.send(Err(ViewStoreError::Timeout));
    }
}

fn strip_scheme(uri: &str) -> &str {
    uri.rsplit_once("://").map(|(_, rest)| rest).unwrap_or(uri)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_scheme() {
        assert_eq!(strip_scheme("tcp://127.0.0.1:6300"), "127.0.0.1:6300");
        assert_eq!(strip_scheme("127.0.0.1:6300"), "127.0.0.1:6300");
    }
}
