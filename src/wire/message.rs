//! Wire message framing (spec §4.G): the control messages exchanged over a
//! length-prefixed TCP connection, one layer below the view serialization in
//! [`super::serialize`].

use crate::error::{ViewStoreError, ViewStoreResult};
use bitflags::bitflags;
use bytes::{Buf, BufMut, Bytes, BytesMut};

bitflags! {
    /// A connected client's producer/consumer intents, carried in its
    /// `Ready` handshake (spec §4.G: "an `info` record describing consumer
    /// interests and producer intents").
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ClientInterest: u8 {
        /// The client streams prefix tables (`TableBegin`/`PrefixRecord*`/
        /// `TableEnd`) and is counted against completion (spec §4.F).
        const PRODUCES_PREFIX = 0b0001;
        /// Subscribes to the exactly-once `FirstFull` publication.
        const CONSUMES_FIRSTFULL = 0b0010;
        /// Subscribes to every `Full` publication, including `FirstFull`.
        const CONSUMES_FULL = 0b0100;
        /// Subscribes to `Partial` publications (subject to
        /// `Config::publish_partial`).
        const CONSUMES_PARTIAL = 0b1000;
    }
}

/// Which interest mask a dispatched view was published under -- mirrors
/// [`crate::dispatch::PublishInterest`] but is the wire-visible tag a
/// consumer filters on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishTag {
    FirstFull,
    Full,
    Partial,
}

/// One protocol message. `Ready`/`Term`/`Heartbeat` manage the connection
/// lifecycle; `Data` carries one table's worth of prefix rows, tagged with a
/// sequence number so the client-side broker can match retries to replies;
/// `Reply` answers a `Data` request; `Publish` is server-to-client only,
/// carrying one dispatched view's serialized bytes (spec §4.H) tagged with
/// its publish interest.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Sent by a client immediately after connecting, identifying itself
    /// and declaring its producer/consumer interests.
    Ready {
        client_name: String,
        interest: ClientInterest,
    },
    /// Either side signals a clean shutdown.
    Term,
    Heartbeat,
    Data { seq: u32, frame: DataFrame },
    Reply { seq: u32, reply: ReplyFrame },
    Publish { tag: PublishTag, payload: Bytes },
}

/// A producer's table is framed as a `TableBegin`, zero or more
/// `PrefixRecord`s, then a `TableEnd`, all addressed to the bucket's
/// bgp-time. `PrefixRecord`'s payload is an encoded
/// [`crate::models::Element`] (spec §6); the collector name travels once, on
/// `TableBegin`, rather than being repeated per row.
#[derive(Debug, Clone, PartialEq)]
pub enum DataFrame {
    TableBegin { bgp_time: u32, collector: String },
    TableEnd { bgp_time: u32 },
    PrefixRecord { bgp_time: u32, payload: Bytes },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyStatus {
    Ok,
    Error,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReplyFrame {
    pub status: ReplyStatus,
    pub detail: String,
}

const TAG_READY: u8 = 1;
const TAG_TERM: u8 = 2;
const TAG_HEARTBEAT: u8 = 3;
const TAG_DATA: u8 = 4;
const TAG_REPLY: u8 = 5;
const TAG_PUBLISH: u8 = 6;

const DATA_TABLE_BEGIN: u8 = 1;
const DATA_TABLE_END: u8 = 2;
const DATA_PREFIX_RECORD: u8 = 3;

const PUBLISH_FIRSTFULL: u8 = 1;
const PUBLISH_FULL: u8 = 2;
const PUBLISH_PARTIAL: u8 = 3;

impl Message {
    pub fn encode(&self, buf: &mut BytesMut) {
        match self {
            Message::Ready { client_name, interest } => {
                buf.put_u8(TAG_READY);
                put_string(buf, client_name);
                buf.put_u8(interest.bits());
            }
            Message::Term => buf.put_u8(TAG_TERM),
            Message::Heartbeat => buf.put_u8(TAG_HEARTBEAT),
            Message::Data { seq, frame } => {
                buf.put_u8(TAG_DATA);
                buf.put_u32(*seq);
                frame.encode(buf);
            }
            Message::Reply { seq, reply } => {
                buf.put_u8(TAG_REPLY);
                buf.put_u32(*seq);
                reply.encode(buf);
            }
            Message::Publish { tag, payload } => {
                buf.put_u8(TAG_PUBLISH);
                buf.put_u8(match tag {
                    PublishTag::FirstFull => PUBLISH_FIRSTFULL,
                    PublishTag::Full => PUBLISH_FULL,
                    PublishTag::Partial => PUBLISH_PARTIAL,
                });
                buf.put_u32(payload.len() as u32);
                buf.put_slice(payload);
            }
        }
    }

    pub fn decode(buf: &mut Bytes) -> ViewStoreResult<Message> {
        require(buf, 1)?;
        match buf.get_u8() {
            TAG_READY => {
                let client_name = get_string(buf)?;
                require(buf, 1)?;
                let interest = ClientInterest::from_bits_truncate(buf.get_u8());
                Ok(Message::Ready { client_name, interest })
            }
            TAG_TERM => Ok(Message::Term),
            TAG_HEARTBEAT => Ok(Message::Heartbeat),
            TAG_DATA => {
                require(buf, 4)?;
                let seq = buf.get_u32();
                Ok(Message::Data {
                    seq,
                    frame: DataFrame::decode(buf)?,
                })
            }
            TAG_REPLY => {
                require(buf, 4)?;
                let seq = buf.get_u32();
                Ok(Message::Reply {
                    seq,
                    reply: ReplyFrame::decode(buf)?,
                })
            }
            TAG_PUBLISH => {
                require(buf, 1)?;
                let tag = match buf.get_u8() {
                    PUBLISH_FIRSTFULL => PublishTag::FirstFull,
                    PUBLISH_FULL => PublishTag::Full,
                    PUBLISH_PARTIAL => PublishTag::Partial,
                    other => {
                        return Err(ViewStoreError::Malformed(format!(
                            "unknown publish tag {other}"
                        )))
                    }
                };
                require(buf, 4)?;
                let len = buf.get_u32() as usize;
                require(buf, len)?;
                let payload = buf.split_to(len);
                Ok(Message::Publish { tag, payload })
            }
            other => Err(ViewStoreError::Malformed(format!(
                "unknown message tag {other}"
            ))),
        }
    }
}

impl DataFrame {
    fn encode(&self, buf: &mut BytesMut) {
        match self {
            DataFrame::TableBegin { bgp_time, collector } => {
                buf.put_u8(DATA_TABLE_BEGIN);
                buf.put_u32(*bgp_time);
                put_string(buf, collector);
            }
            DataFrame::TableEnd { bgp_time } => {
                buf.put_u8(DATA_TABLE_END);
                buf.put_u32(*bgp_time);
            }
            DataFrame::PrefixRecord { bgp_time, payload } => {
                buf.put_u8(DATA_PREFIX_RECORD);
                buf.put_u32(*bgp_time);
                buf.put_u32(payload.len() as u32);
                buf.put_slice(payload);
            }
        }
    }

    fn decode(buf: &mut Bytes) -> ViewStoreResult<DataFrame> {
        require(buf, 1)?;
        match buf.get_u8() {
            DATA_TABLE_BEGIN => {
                require(buf, 4)?;
                let bgp_time = buf.get_u32();
                let collector = get_string(buf)?;
                Ok(DataFrame::TableBegin { bgp_time, collector })
            }
            DATA_TABLE_END => {
                require(buf, 4)?;
                Ok(DataFrame::TableEnd {
                    bgp_time: buf.get_u32(),
                })
            }
            DATA_PREFIX_RECORD => {
                require(buf, 8)?;
                let bgp_time = buf.get_u32();
                let len = buf.get_u32() as usize;
                require(buf, len)?;
                let payload = buf.split_to(len);
                Ok(DataFrame::PrefixRecord { bgp_time, payload })
            }
            other => Err(ViewStoreError::Malformed(format!(
                "unknown data sub-tag {other}"
            ))),
        }
    }
}

impl ReplyFrame {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(match self.status {
            ReplyStatus::Ok => 0,
            ReplyStatus::Error => 1,
        });
        put_string(buf, &self.detail);
    }

    fn decode(buf: &mut Bytes) -> ViewStoreResult<ReplyFrame> {
        require(buf, 1)?;
        let status = match buf.get_u8() {
            0 => ReplyStatus::Ok,
            1 => ReplyStatus::Error,
            other => {
                return Err(ViewStoreError::Malformed(format!(
                    "unknown reply status {other}"
                )))
            }
        };
        let detail = get_string(buf)?;
        Ok(ReplyFrame { status, detail })
    }
}

fn require(buf: &Bytes, n: usize) -> ViewStoreResult<()> {
    if buf.remaining() < n {
        return Err(ViewStoreError::Malformed("truncated message".to_string()));
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

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(msg: Message) {
        let mut buf = BytesMut::new();
        msg.encode(&mut buf);
        let mut frozen = buf.freeze();
        let decoded = Message::decode(&mut frozen).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_roundtrip_ready() {
        roundtrip(Message::Ready {
            client_name: "rib-archiver".to_string(),
            interest: ClientInterest::PRODUCES_PREFIX,
        });
    }

    #[test]
    fn test_roundtrip_term_and_heartbeat() {
        roundtrip(Message::Term);
        roundtrip(Message::Heartbeat);
    }

    #[test]
    fn test_roundtrip_data_frames() {
        roundtrip(Message::Data {
            seq: 1,
            frame: DataFrame::TableBegin {
                bgp_time: 120,
                collector: "rv2".to_string(),
            },
        });
        roundtrip(Message::Data {
            seq: 2,
            frame: DataFrame::TableEnd { bgp_time: 120 },
        });
        roundtrip(Message::Data {
            seq: 3,
            frame: DataFrame::PrefixRecord {
                bgp_time: 120,
                payload: Bytes::from_static(b"row-bytes"),
            },
        });
    }

    #[test]
    fn test_roundtrip_reply() {
        roundtrip(Message::Reply {
            seq: 3,
            reply: ReplyFrame {
                status: ReplyStatus::Error,
                detail: "unknown client".to_string(),
            },
        });
    }

    #[test]
    fn test_roundtrip_publish() {
        roundtrip(Message::Publish {
            tag: PublishTag::FirstFull,
            payload: Bytes::from_static(b"view-bytes"),
        });
    }

    #[test]
    fn test_interest_bits_roundtrip() {
        let interest = ClientInterest::PRODUCES_PREFIX | ClientInterest::CONSUMES_FULL;
        assert_eq!(
            ClientInterest::from_bits_truncate(interest.bits()),
            interest
        );
    }

    #[test]
    fn test_decode_empty_is_malformed() {
        let mut empty = Bytes::new();
        assert!(Message::decode(&mut empty).is_err());
    }

    #[test]
    fn test_decode_unknown_tag_is_malformed() {
        let mut buf = Bytes::from_static(&[0xFF]);
        assert!(Message::decode(&mut buf).is_err());
    }
}
