//! Server side of the wire protocol: accepts client connections, applies
//! producer-submitted rows to the store, and drives the store's dispatch
//! decisions from `TableEnd`/disconnect/timeout events (spec §4.G).

use crate::config::Config;
use crate::dispatch::{CompletionTrigger, PublishInterest};
use crate::error::ViewStoreError;
use crate::fsm::ElementOutcome;
use crate::models::{Element, ElementKind, PeerFsmState};
use crate::models::network::{PeerId, PeerSignature};
use crate::store::{GetSlotOutcome, PublishEvent, ViewStore};
use crate::wire::message::{ClientInterest, DataFrame, Message, PublishTag, ReplyFrame, ReplyStatus};
use crate::wire::MessageCodec;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio_util::codec::Framed;

/// Per-client server-side state: identity, declared interests, and the
/// bucket it's currently streaming rows for (if any).
#[derive(Debug, Default)]
struct ClientInfo {
    name: String,
    interest: ClientInterest,
    collector: String,
    in_progress_table: Option<u32>,
    /// Set when the in-progress table's bucket fell outside the store's
    /// window (`GetSlotOutcome::Exceeded`): its rows are accepted and
    /// acknowledged but silently dropped rather than applied.
    ignored: bool,
    touched_peers: HashSet<PeerId>,
}

/// Registered consumer: where to send pushed messages, and what it wants.
struct ClientHandle {
    tx: mpsc::UnboundedSender<Message>,
    interest: ClientInterest,
}

/// Shared server state behind a single lock: the view store plus the
/// currently connected clients. A `tokio::sync::mpsc` channel per
/// connection carries outbound messages (dispatched views, replies) without
/// needing the lock held across an `await` on the socket write.
pub struct Server {
    store: Mutex<ViewStore>,
    clients: Mutex<HashMap<String, ClientHandle>>,
}

impl Server {
    pub fn new(config: Config) -> Arc<Self> {
        Arc::new(Server {
            store: Mutex::new(ViewStore::new(config)),
            clients: Mutex::new(HashMap::new()),
        })
    }

    /// Binds `addr` and serves connections until the listener errs; each
    /// connection runs on its own task. A background task also sweeps
    /// timed-out views on the same cadence as the configured heartbeat.
    pub async fn run(self: Arc<Self>, addr: &str) -> std::io::Result<()> {
        let listener = TcpListener::bind(addr).await?;
        info!("view-store server listening on {addr}");

        let sweeper = Arc::clone(&self);
        tokio::spawn(async move { sweeper.run_timeout_sweeper().await });

        loop {
            let (stream, peer_addr) = listener.accept().await?;
            debug!("accepted connection from {peer_addr}");
            let server = Arc::clone(&self);
            tokio::spawn(async move {
                if let Err(e) = server.handle_connection(stream).await {
                    warn!("connection from {peer_addr} ended with error: {e}");
                }
            });
        }
    }

    async fn run_timeout_sweeper(self: Arc<Self>) {
        let period = {
            let store = self.store.lock().await;
            store.config().heartbeat_interval
        };
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            let now_sec = crate::view::WallTime::now().sec;
            let events = {
                let mut store = self.store.lock().await;
                store.sweep_timeouts(now_sec)
            };
            self.dispatch_events(events).await;
        }
    }

    async fn handle_connection(self: Arc<Self>, stream: TcpStream) -> std::io::Result<()> {
        let mut framed = Framed::new(stream, MessageCodec);
        let mut client = ClientInfo::default();
        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

        let (client_name, interest) = match framed.next().await {
            Some(Ok(Message::Ready { client_name, interest })) => (client_name, interest),
            _ => {
                warn!("connection did not open with Ready, dropping");
                return Ok(());
            }
        };
        client.name = client_name.clone();
        client.interest = interest;

        self.clients
            .lock()
            .await
            .insert(client_name.clone(), ClientHandle { tx, interest });
        if interest.contains(ClientInterest::PRODUCES_PREFIX) {
            self.store.lock().await.register_producing_client(client_name.clone());
        }
        info!("client '{client_name}' ready with interest {interest:?}");

        let (heartbeat_interval, liveness) = {
            let store = self.store.lock().await;
            (store.config().heartbeat_interval, store.config().heartbeat_liveness)
        };
        let mut heartbeat = tokio::time::interval(heartbeat_interval);
        heartbeat.tick().await;
        let mut missed: u32 = 0;

        loop {
            tokio::select! {
                incoming = framed.next() => {
                    match incoming {
                        Some(Ok(msg)) => {
                            missed = 0;
                            if !self.on_client_message(&mut client, &mut framed, msg).await {
                                break;
                            }
                        }
                        Some(Err(e)) => {
                            warn!("client '{}' framing error: {}", client.name, e);
                            break;
                        }
                        None => break,
                    }
                }
                outgoing = rx.recv() => {
                    match outgoing {
                        Some(msg) => {
                            if framed.send(msg).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                _ = heartbeat.tick() => {
                    missed += 1;
                    if missed >= liveness {
                        warn!("client '{}' missed {missed} heartbeat intervals, dropping", client.name);
                        break;
                    }
                    if framed.send(Message::Heartbeat).await.is_err() {
                        break;
                    }
                }
            }
        }

        self.client_disconnect(&client).await;
        Ok(())
    }

    /// Returns `false` if the connection should close.
    async fn on_client_message(
        &self,
        client: &mut ClientInfo,
        framed: &mut Framed<TcpStream, MessageCodec>,
        msg: Message,
    ) -> bool {
        match msg {
            Message::Term => return false,
            Message::Heartbeat => {}
            Message::Data { seq, frame } => {
                let reply = self.apply_data_frame(client, frame).await;
                let _ = framed.send(Message::Reply { seq, reply }).await;
            }
            Message::Reply { .. } | Message::Ready { .. } | Message::Publish { .. } => {
                warn!("unexpected message from client '{}'", client.name);
            }
        }
        true
    }

    async fn apply_data_frame(&self, client: &mut ClientInfo, frame: DataFrame) -> ReplyFrame {
        match frame {
            DataFrame::TableBegin { bgp_time, collector } => self.begin_table(client, bgp_time, collector).await,
            DataFrame::PrefixRecord { bgp_time, payload } => self.apply_row(client, bgp_time, payload).await,
            DataFrame::TableEnd { bgp_time } => self.end_table(client, bgp_time).await,
        }
    }

    async fn begin_table(&self, client: &mut ClientInfo, bgp_time: u32, collector: String) -> ReplyFrame {
        if client.in_progress_table.is_some() {
            return err_reply("a table is already in progress on this connection");
        }
        let mut store = self.store.lock().await;
        let bucket = store.config().truncate_to_bucket(bgp_time);
        let head_time = store.head_bgp_time();
        let (outcome, events) = store.get_slot(bucket);
        drop(store);
        self.dispatch_events(events).await;

        client.in_progress_table = Some(bucket);
        client.collector = collector;
        client.touched_peers.clear();
        match outcome {
            GetSlotOutcome::Exceeded => {
                client.ignored = true;
                let error = ViewStoreError::OutOfWindow { bgp_time: bucket, head_time };
                warn!("{} table-begin rejected: {error}", client.name);
                err_reply(&error.to_string())
            }
            GetSlotOutcome::Valid => {
                client.ignored = false;
                ok_reply()
            }
        }
    }

    async fn apply_row(&self, client: &mut ClientInfo, bgp_time: u32, payload: Bytes) -> ReplyFrame {
        let Some(bucket) = client.in_progress_table else {
            return err_reply("no table is in progress on this connection");
        };
        if client.ignored {
            return ok_reply();
        }

        if bgp_time != bucket {
            return err_reply("row bucket does not match the in-progress table");
        }

        let mut cursor = payload;
        let elem = match Element::decode(&mut cursor) {
            Ok(elem) => elem,
            Err(e) => return err_reply(&format!("malformed prefix record: {e}")),
        };

        let mut store = self.store.lock().await;

        let Some(signature) = PeerSignature::new(client.collector.clone(), elem.peer_address) else {
            return err_reply("collector name too long");
        };
        let peer_id = match store.registry_mut().set_and_get(signature) {
            Ok(peer_id) => peer_id,
            Err(e) => {
                warn!("{} row rejected: {e}", client.name);
                return err_reply(&e.to_string());
            }
        };

        let Some(slot) = store.slot_mut(bucket) else {
            return err_reply("table bucket is no longer present in the store");
        };
        let outcome = slot.peer_fsm_mut(peer_id).observe(elem.timestamp, &elem.kind);
        match outcome {
            ElementOutcome::Apply => {
                apply_element_to_view(slot, peer_id, &elem);
                slot.book.mark_modified();
                client.touched_peers.insert(peer_id);
            }
            ElementOutcome::StateChanged => {
                update_inactive_peers(slot, peer_id, &elem.kind);
                client.touched_peers.insert(peer_id);
            }
            ElementOutcome::IgnoredNotEstablished | ElementOutcome::IgnoredOutOfOrder => {}
        }
        ok_reply()
    }

    async fn end_table(&self, client: &mut ClientInfo, bgp_time: u32) -> ReplyFrame {
        let Some(bucket) = client.in_progress_table else {
            return err_reply("no table is in progress on this connection");
        };

        let event = {
            let mut store = self.store.lock().await;
            if store.config().truncate_to_bucket(bgp_time) != bucket {
                return err_reply("table-end bucket does not match the in-progress table");
            }
            if !client.ignored {
                if let Some(slot) = store.slot_mut(bucket) {
                    for peer_id in client.touched_peers.drain() {
                        slot.peer_fsm_mut(peer_id).table_end();
                    }
                    slot.book.client_done(client.name.clone());
                }
            }
            store.complete(bucket, CompletionTrigger::TableEnd)
        };
        if let Some(event) = event {
            self.dispatch_events(vec![event]).await;
        }

        client.in_progress_table = None;
        client.ignored = false;
        client.touched_peers.clear();
        ok_reply()
    }

    async fn client_disconnect(&self, client: &ClientInfo) {
        self.clients.lock().await.remove(&client.name);
        if client.interest.contains(ClientInterest::PRODUCES_PREFIX) {
            let mut store = self.store.lock().await;
            store.unregister_producing_client(&client.name);
            if let Some(bucket) = client.in_progress_table {
                if let Some(event) = store.complete(bucket, CompletionTrigger::ClientDisconnect) {
                    drop(store);
                    self.dispatch_events(vec![event]).await;
                }
            }
        }
        info!("client '{}' disconnected", client.name);
    }

    async fn dispatch_events(&self, events: Vec<PublishEvent>) {
        for event in events {
            let (Some(interest), Some(payload)) = (event.outcome.publish, event.payload) else {
                continue;
            };
            let tag = match interest {
                PublishInterest::FirstFull => PublishTag::FirstFull,
                PublishInterest::Full => PublishTag::Full,
                PublishInterest::Partial => PublishTag::Partial,
            };
            self.publish(tag, payload).await;
        }
    }

    /// Sends a dispatched view to every connected client whose declared
    /// interest covers `tag` (spec §4.G/§4.F).
    pub async fn publish(&self, tag: PublishTag, payload: Bytes) {
        let required = match tag {
            PublishTag::FirstFull => ClientInterest::CONSUMES_FIRSTFULL | ClientInterest::CONSUMES_FULL,
            PublishTag::Full => ClientInterest::CONSUMES_FULL,
            PublishTag::Partial => ClientInterest::CONSUMES_PARTIAL,
        };
        let clients = self.clients.lock().await;
        for handle in clients.values() {
            if handle.interest.intersects(required) {
                let _ = handle.tx.send(Message::Publish {
                    tag,
                    payload: payload.clone(),
                });
            }
        }
    }

    pub fn store(&self) -> &Mutex<ViewStore> {
        &self.store
    }
}

fn ok_reply() -> ReplyFrame {
    ReplyFrame {
        status: ReplyStatus::Ok,
        detail: String::new(),
    }
}

fn err_reply(detail: &str) -> ReplyFrame {
    ReplyFrame {
        status: ReplyStatus::Error,
        detail: detail.to_string(),
    }
}

/// Origin AS for a `Rib`/`Announce` row: the AS path's origin, falling back
/// to the element's own `peer_asn` for a path-less (e.g. iBGP) route.
fn origin_asn(elem: &Element) -> u32 {
    use crate::models::OriginAs;
    match elem.aspath().and_then(|p| p.origin()) {
        Some(OriginAs::Asn(asn)) => asn.to_u32(),
        Some(OriginAs::Set(set)) => set.first().map(|asn| asn.to_u32()).unwrap_or(elem.peer_asn),
        None => elem.peer_asn,
    }
}

fn apply_element_to_view(slot: &mut crate::store::StoreView, peer_id: PeerId, elem: &Element) {
    match &elem.kind {
        ElementKind::Rib { prefix, .. } | ElementKind::Announce { prefix, .. } => {
            slot.view.add_prefix(*prefix, peer_id, origin_asn(elem));
        }
        ElementKind::Withdraw { prefix } => {
            slot.view.withdraw_prefix(*prefix, peer_id);
        }
        ElementKind::PeerState { .. } => {}
    }
}

/// Tracks the store-view's `inactive-peers` set (spec §3) from a `PeerState`
/// transition: a peer leaving `Established` is inactive until it comes back
/// up, mirroring the legacy store's up/down bookkeeping.
fn update_inactive_peers(slot: &mut crate::store::StoreView, peer_id: PeerId, kind: &ElementKind) {
    if let ElementKind::PeerState { new_state, .. } = kind {
        if *new_state == PeerFsmState::Established {
            slot.inactive_peers.remove(&peer_id);
        } else {
            slot.inactive_peers.insert(peer_id);
        }
    }
}

#[cfg(test)]
mod inactive_peers_tests {
    use super::*;
    use crate::config::Config;
    use crate::models::network::PeerId;
    use crate::store::ViewStore;

    #[test]
    fn peer_state_down_marks_inactive_then_up_clears_it() {
        let mut store = ViewStore::new(Config::default());
        store.get_slot(60);
        let slot = store.slot_mut(60).unwrap();
        let peer_id = PeerId(1);

        update_inactive_peers(
            slot,
            peer_id,
            &ElementKind::PeerState {
                old_state: PeerFsmState::Established,
                new_state: PeerFsmState::Idle,
            },
        );
        assert!(slot.inactive_peers.contains(&peer_id));

        update_inactive_peers(
            slot,
            peer_id,
            &ElementKind::PeerState {
                old_state: PeerFsmState::Idle,
                new_state: PeerFsmState::Established,
            },
        );
        assert!(!slot.inactive_peers.contains(&peer_id));
    }
}
