//! Length-prefixed framing for [`Message`] over a `tokio` byte stream: a
//! `u32` big-endian length prefix followed by the message's own encoding.

use crate::error::{ViewStoreError, ViewStoreErrorWithContext};
use crate::wire::message::Message;
use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Refuses to allocate for a claimed frame length above this, so a
/// corrupted or hostile length prefix can't trigger unbounded buffering.
const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

#[derive(Debug, Default)]
pub struct MessageCodec;

impl Encoder<Message> for MessageCodec {
    type Error = ViewStoreErrorWithContext;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let mut payload = BytesMut::new();
        item.encode(&mut payload);
        if payload.len() > MAX_FRAME_LEN {
            return Err(ViewStoreError::Malformed("outgoing frame too large".to_string()).into());
        }
        dst.reserve(4 + payload.len());
        dst.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        dst.extend_from_slice(&payload);
        Ok(())
    }
}

impl Decoder for MessageCodec {
    type Item = Message;
    type Error = ViewStoreErrorWithContext;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < 4 {
            return Ok(None);
        }
        let len = u32::from_be_bytes(src[..4].try_into().unwrap()) as usize;
        if len > MAX_FRAME_LEN {
            return Err(ViewStoreError::Malformed(format!(
                "incoming frame of {len} bytes exceeds limit"
            ))
            .into());
        }
        if src.len() < 4 + len {
            src.reserve(4 + len - src.len());
            return Ok(None);
        }

        src.advance(4);
        let frame = src.split_to(len).freeze();
        let mut cursor = frame.clone();
        Message::decode(&mut cursor)
            .map(Some)
            .map_err(|e| ViewStoreErrorWithContext::with_bytes(e, frame.to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::message::DataFrame;

    #[test]
    fn test_codec_roundtrip_single_message() {
        let mut codec = MessageCodec;
        let mut buf = BytesMut::new();
        let msg = Message::Data {
            seq: 1,
            frame: DataFrame::TableBegin {
                bgp_time: 60,
                collector: "rv2".to_string(),
            },
        };
        codec.encode(msg.clone(), &mut buf).unwrap();
        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, msg);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_codec_waits_for_full_frame() {
        let mut codec = MessageCodec;
        let mut buf = BytesMut::new();
        codec.encode(Message::Heartbeat, &mut buf).unwrap();
        let mut partial = buf.split_to(buf.len() - 1);
        assert!(codec.decode(&mut partial).unwrap().is_none());
    }

    #[test]
    fn test_codec_rejects_oversized_frame() {
        let mut codec = MessageCodec;
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&(MAX_FRAME_LEN as u32 + 1).to_be_bytes());
        assert!(codec.decode(&mut buf).is_err());
    }
}
