//! AS path representation.
//!
//! Segments are packed back-to-back into a single [`bytes::Bytes`] buffer
//! instead of a `Vec`/`SmallVec` of owned segments (compare the teacher's
//! `AsPathStorage` in `bgpkit-parser`): paths are built once during ingest
//! and read many times, so a single contiguous allocation with an O(1)
//! cached offset to the last segment beats optimizing for repeated cloning.

use crate::models::network::Asn;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fmt::{Display, Formatter};


const TAG_ASN: u8 = 0;
const TAG_SET: u8 = 1;
const TAG_CONFED_SET: u8 = 2;
const TAG_CONFED_SEQ: u8 = 3;

/// One AS-path segment. A wire `AS_SEQUENCE` is expanded into a run of
/// `Asn` segments -- the storage never holds a multi-ASN sequence segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AsPathSegment {
    Asn(Asn),
    Set(Vec<Asn>),
    ConfedSet(Vec<Asn>),
    ConfedSeq(Vec<Asn>),
}

/// The origin AS of a path: either a single ASN or, if the path ends in a
/// set, the set as a whole.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OriginAs {
    Asn(Asn),
    Set(Vec<Asn>),
}

/// An ordered sequence of AS-path segments, packed into one buffer.
#[derive(Debug, Clone, Eq)]
pub struct AsPath {
    buf: Bytes,
    /// Byte offset of the last segment's tag within `buf`, cached at
    /// construction time so origin lookup never walks the buffer.
    last_segment_offset: Option<usize>,
    len: usize,
}

impl PartialEq for AsPath {
    fn eq(&self, other: &Self) -> bool {
        self.buf == other.buf
    }
}

impl Default for AsPath {
    fn default() -> Self {
        AsPath {
            buf: Bytes::new(),
            last_segment_offset: None,
            len: 0,
        }
    }
}

fn encode_segment(out: &mut BytesMut, segment: &AsPathSegment) {
    match segment {
        AsPathSegment::Asn(asn) => {
            out.put_u8(TAG_ASN);
            out.put_u32(asn.to_u32());
        }
        AsPathSegment::Set(v) | AsPathSegment::ConfedSet(v) | AsPathSegment::ConfedSeq(v) => {
            let tag = match segment {
                AsPathSegment::Set(_) => TAG_SET,
                AsPathSegment::ConfedSet(_) => TAG_CONFED_SET,
                AsPathSegment::ConfedSeq(_) => TAG_CONFED_SEQ,
                AsPathSegment::Asn(_) => unreachable!(),
            };
            out.put_u8(tag);
            out.put_u16(v.len() as u16);
            for asn in v {
                out.put_u32(asn.to_u32());
            }
        }
    }
}

/// Decodes one segment starting at `offset`, returning the segment and the
/// offset immediately past it.
fn decode_segment_at(buf: &Bytes, offset: usize) -> (AsPathSegment, usize) {
    let mut cursor = &buf[offset..];
    let tag = cursor.get_u8();
    match tag {
        TAG_ASN => {
            let asn = Asn::from(cursor.get_u32());
            (AsPathSegment::Asn(asn), offset + 1 + 4)
        }
        TAG_SET | TAG_CONFED_SET | TAG_CONFED_SEQ => {
            let count = cursor.get_u16() as usize;
            let mut v = Vec::with_capacity(count);
            for _ in 0..count {
                v.push(Asn::from(cursor.get_u32()));
            }
            let consumed = 1 + 2 + count * 4;
            let seg = match tag {
                TAG_SET => AsPathSegment::Set(v),
                TAG_CONFED_SET => AsPathSegment::ConfedSet(v),
                _ => AsPathSegment::ConfedSeq(v),
            };
            (seg, offset + consumed)
        }
        other => panic!("corrupt as-path buffer: unknown segment tag {other}"),
    }
}

impl AsPath {
    pub fn new() -> AsPath {
        AsPath::default()
    }

    /// Shorthand for an AS path made of a single flat sequence of ASNs.
    pub fn from_sequence<S: AsRef<[u32]>>(seq: S) -> AsPath {
        let segments: Vec<AsPathSegment> = seq
            .as_ref()
            .iter()
            .map(|&a| AsPathSegment::Asn(Asn::from(a)))
            .collect();
        AsPath::from_segments(segments)
    }

    pub fn from_segments(segments: Vec<AsPathSegment>) -> AsPath {
        let mut out = BytesMut::new();
        let mut last_segment_offset = None;
        for segment in &segments {
            last_segment_offset = Some(out.len());
            encode_segment(&mut out, segment);
        }
        AsPath {
            buf: out.freeze(),
            last_segment_offset,
            len: segments.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The packed segment buffer, verbatim. Lets the wire layer ship an
    /// `AsPath` without re-walking or re-encoding its segments.
    pub fn as_bytes(&self) -> &Bytes {
        &self.buf
    }

    /// Reconstructs an `AsPath` from a buffer produced by [`Self::as_bytes`],
    /// re-deriving `len` and the cached last-segment offset by walking it
    /// once.
    pub fn from_bytes(buf: Bytes) -> AsPath {
        let mut offset = 0;
        let mut len = 0;
        let mut last_segment_offset = None;
        while offset < buf.len() {
            last_segment_offset = Some(offset);
            let (_, next) = decode_segment_at(&buf, offset);
            offset = next;
            len += 1;
        }
        AsPath {
            buf,
            last_segment_offset,
            len,
        }
    }

    /// Number of segments in this path (after wire-sequence flattening,
    /// so this is also the route length contributed by `Asn` segments).
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn iter(&self) -> AsPathIter<'_> {
        AsPathIter {
            path: self,
            offset: 0,
        }
    }

    /// Origin AS lookup: O(1) via the cached last-segment offset.
    pub fn origin(&self) -> Option<OriginAs> {
        let offset = self.last_segment_offset?;
        let (segment, _) = decode_segment_at(&self.buf, offset);
        match segment {
            AsPathSegment::Asn(asn) => Some(OriginAs::Asn(asn)),
            AsPathSegment::Set(v) | AsPathSegment::ConfedSet(v) | AsPathSegment::ConfedSeq(v) => {
                Some(OriginAs::Set(v))
            }
        }
    }

    pub fn contains_asn(&self, asn: Asn) -> bool {
        self.iter().any(|seg| match seg {
            AsPathSegment::Asn(a) => a == asn,
            AsPathSegment::Set(v) | AsPathSegment::ConfedSet(v) | AsPathSegment::ConfedSeq(v) => {
                v.contains(&asn)
            }
        })
    }
}

pub struct AsPathIter<'a> {
    path: &'a AsPath,
    offset: usize,
}

impl Iterator for AsPathIter<'_> {
    type Item = AsPathSegment;

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset >= self.path.buf.len() {
            return None;
        }
        let (segment, next_offset) = decode_segment_at(&self.path.buf, self.offset);
        self.offset = next_offset;
        Some(segment)
    }
}

impl<'a> IntoIterator for &'a AsPath {
    type Item = AsPathSegment;
    type IntoIter = AsPathIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl Display for AsPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        for (i, segment) in self.iter().enumerate() {
            if i != 0 {
                write!(f, " ")?;
            }
            match segment {
                AsPathSegment::Asn(asn) => write!(f, "{asn}")?,
                AsPathSegment::Set(v) | AsPathSegment::ConfedSet(v) | AsPathSegment::ConfedSeq(v) => {
                    write!(f, "{{")?;
                    for (j, asn) in v.iter().enumerate() {
                        if j != 0 {
                            write!(f, ",")?;
                        }
                        write!(f, "{asn}")?;
                    }
                    write!(f, "}}")?;
                }
            }
        }
        Ok(())
    }
}
