use std::cell::Cell;

use alloy_primitives::B256;
use sha3::{Digest, Keccak256};
use thiserror::Error;

const SINGLE_BYTE_MAX: u8 = 0x7f;
const STRING_BASE: u8 = 0x80;
const LONG_STRING_PREFIX: u8 = 0xb7;
const LONG_STRING_MAX: u8 = 0xbf;
const LIST_BASE: u8 = 0xc0;
const LONG_LIST_PREFIX: u8 = 0xf7;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RlpError {
    #[error("truncated input")]
    Truncated,
    #[error("length field overflows the buffer")]
    LengthOverflow,
}

/// Byte destination for RLP encoding.
pub trait Sink {
    fn put_byte(&mut self, b: u8);
    fn put(&mut self, bytes: &[u8]);
}

enum Payload<'a> {
    List(&'a [Node<'a>]),
    Bytes(&'a [u8]),
    Integer(u64),
}

/// One node of an RLP tree, borrowing its payload.
///
/// The encoded size including the header is computed lazily and cached, so
/// writing a list re-derives each child's size at most once no matter how
/// often the tree is serialized.
pub struct Node<'a> {
    payload: Payload<'a>,
    size_brutto: Cell<u64>,
}

/// Minimal big-endian byte count of `n`; zero needs no bytes.
fn bytes_for(n: u64) -> u8 {
    ((64 - n.leading_zeros()).div_ceil(8)) as u8
}

fn write_var_len(s: &mut impl Sink, n: u64, len: u8) {
    let mut shift = (len as u32) * 8;
    while shift > 0 {
        shift -= 8;
        s.put_byte((n >> shift) as u8);
    }
}

fn write_size(s: &mut impl Sink, base: u8, n: u64) {
    if n < 56 {
        s.put_byte(base + n as u8);
    } else {
        let len = bytes_for(n);
        s.put_byte(base + 55 + len);
        write_var_len(s, n, len);
    }
}

impl<'a> Node<'a> {
    pub fn bytes(b: &'a [u8]) -> Self {
        Self {
            payload: Payload::Bytes(b),
            size_brutto: Cell::new(0),
        }
    }

    pub fn integer(n: u64) -> Self {
        Self {
            payload: Payload::Integer(n),
            size_brutto: Cell::new(0),
        }
    }

    pub fn list(children: &'a [Node<'a>]) -> Self {
        Self {
            payload: Payload::List(children),
            size_brutto: Cell::new(0),
        }
    }

    /// Encoded size including the header byte(s), cached after first use.
    pub fn encoded_size(&self) -> u64 {
        if self.size_brutto.get() == 0 {
            let mut counter = SizeCounter(0);
            self.write(&mut counter);
            self.size_brutto.set(counter.0);
        }
        self.size_brutto.get()
    }

    /// Serialize canonically into the sink.
    pub fn write(&self, s: &mut impl Sink) {
        match self.payload {
            Payload::List(children) => {
                let net: u64 = children.iter().map(Node::encoded_size).sum();
                write_size(s, LIST_BASE, net);
                for child in children {
                    child.write(s);
                }
            }
            Payload::Bytes(b) => {
                if b.len() != 1 || b[0] > SINGLE_BYTE_MAX {
                    write_size(s, STRING_BASE, b.len() as u64);
                }
                s.put(b);
            }
            Payload::Integer(n) => {
                let len = bytes_for(n);
                if len == 1 && (n as u8) <= SINGLE_BYTE_MAX {
                    s.put_byte(n as u8);
                } else {
                    write_size(s, STRING_BASE, len as u64);
                    write_var_len(s, n, len);
                }
            }
        }
    }

    /// Convenience encoding into a fresh buffer.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = VecSink(Vec::with_capacity(self.encoded_size() as usize));
        self.write(&mut out);
        out.0
    }
}

struct SizeCounter(u64);

impl Sink for SizeCounter {
    fn put_byte(&mut self, _b: u8) {
        self.0 += 1;
    }

    fn put(&mut self, bytes: &[u8]) {
        self.0 += bytes.len() as u64;
    }
}

struct VecSink(Vec<u8>);

impl Sink for VecSink {
    fn put_byte(&mut self, b: u8) {
        self.0.push(b);
    }

    fn put(&mut self, bytes: &[u8]) {
        self.0.extend_from_slice(bytes);
    }
}

/// Buffered Keccak-256 sink.
///
/// Bytes accumulate in a small buffer that is fed to the sponge whenever the
/// next write would overflow; writes larger than the buffer bypass it.
pub struct HashStream {
    sponge: Keccak256,
    buf: [u8; 128],
    len: usize,
}

impl Default for HashStream {
    fn default() -> Self {
        Self::new()
    }
}

impl HashStream {
    pub fn new() -> Self {
        Self {
            sponge: Keccak256::new(),
            buf: [0u8; 128],
            len: 0,
        }
    }

    fn flush(&mut self) {
        if self.len > 0 {
            self.sponge.update(&self.buf[..self.len]);
            self.len = 0;
        }
    }

    fn append(&mut self, bytes: &[u8]) -> bool {
        if self.len + bytes.len() > self.buf.len() {
            return false;
        }
        self.buf[self.len..self.len + bytes.len()].copy_from_slice(bytes);
        self.len += bytes.len();
        true
    }

    pub fn finish(mut self) -> B256 {
        self.flush();
        B256::from_slice(&self.sponge.finalize())
    }
}

impl Sink for HashStream {
    fn put_byte(&mut self, b: u8) {
        if self.len == self.buf.len() {
            self.flush();
        }
        self.buf[self.len] = b;
        self.len += 1;
    }

    fn put(&mut self, bytes: &[u8]) {
        if !self.append(bytes) {
            self.flush();
            if !self.append(bytes) {
                self.sponge.update(bytes);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// A decoded element. A `List` carries its raw payload; the visitor decides
/// whether to recurse into it.
#[derive(Debug, PartialEq, Eq)]
pub enum Item<'a> {
    Bytes(&'a [u8]),
    List(&'a [u8]),
}

pub trait Visitor {
    /// Called once per element. For a `List`, returning `true` recurses into
    /// the children; `false` leaves it opaque.
    fn on_node(&mut self, item: Item<'_>) -> bool;
}

fn read_length(input: &[u8], pos: usize, n_bytes: usize) -> Result<(u64, usize), RlpError> {
    if n_bytes > input.len() - pos {
        return Err(RlpError::Truncated);
    }
    let mut len = 0u64;
    for &b in &input[pos..pos + n_bytes] {
        len = (len << 8) | b as u64;
    }
    Ok((len, pos + n_bytes))
}

/// Walk every RLP element in `input`, invoking the visitor per element.
pub fn decode(input: &[u8], visitor: &mut impl Visitor) -> Result<(), RlpError> {
    let mut pos = 0usize;
    while pos < input.len() {
        let b = input[pos];
        pos += 1;

        if b <= SINGLE_BYTE_MAX {
            visitor.on_node(Item::Bytes(&input[pos - 1..pos]));
            continue;
        }

        let (len, is_list) = if b <= LONG_STRING_PREFIX {
            ((b - STRING_BASE) as u64, false)
        } else if b <= LONG_STRING_MAX {
            let (len, next) = read_length(input, pos, (b - LONG_STRING_PREFIX) as usize)?;
            pos = next;
            (len, false)
        } else if b <= LONG_LIST_PREFIX {
            ((b - LIST_BASE) as u64, true)
        } else {
            let (len, next) = read_length(input, pos, (b - LONG_LIST_PREFIX) as usize)?;
            pos = next;
            (len, true)
        };

        if len > (input.len() - pos) as u64 {
            return Err(RlpError::LengthOverflow);
        }
        let len = len as usize;
        let payload = &input[pos..pos + len];

        if is_list {
            if visitor.on_node(Item::List(payload)) {
                decode(payload, visitor)?;
            }
        } else {
            visitor.on_node(Item::Bytes(payload));
        }
        pos += len;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Collects every visited node, recursing into all lists.
    #[derive(Default)]
    struct Collect {
        nodes: Vec<(bool, Vec<u8>)>,
    }

    impl Visitor for Collect {
        fn on_node(&mut self, item: Item<'_>) -> bool {
            match item {
                Item::Bytes(b) => {
                    self.nodes.push((false, b.to_vec()));
                    false
                }
                Item::List(p) => {
                    self.nodes.push((true, p.to_vec()));
                    true
                }
            }
        }
    }

    #[test]
    fn canonical_integer() {
        // 0x0400 = 1024
        assert_eq!(Node::integer(0x0400).encode(), vec![0x82, 0x04, 0x00]);
        assert_eq!(Node::integer(0).encode(), vec![0x80]);
        assert_eq!(Node::integer(0x7f).encode(), vec![0x7f]);
        assert_eq!(Node::integer(0x80).encode(), vec![0x81, 0x80]);
    }

    #[test]
    fn canonical_strings() {
        assert_eq!(Node::bytes(&[0x7f]).encode(), vec![0x7f]);
        assert_eq!(Node::bytes(&[0x80]).encode(), vec![0x81, 0x80]);
        assert_eq!(Node::bytes(b"").encode(), vec![0x80]);
        assert_eq!(
            Node::bytes(b"dog").encode(),
            vec![0x83, b'd', b'o', b'g']
        );

        let long = [0xaa; 60];
        let enc = Node::bytes(&long).encode();
        assert_eq!(enc[0], 0xb7 + 1);
        assert_eq!(enc[1], 60);
        assert_eq!(&enc[2..], &long[..]);
    }

    #[test]
    fn canonical_lists() {
        assert_eq!(Node::list(&[]).encode(), vec![0xc0]);

        let children = [Node::bytes(b"dog")];
        assert_eq!(
            Node::list(&children).encode(),
            vec![0xc4, 0x83, b'd', b'o', b'g']
        );
    }

    #[test]
    fn size_is_cached_across_writes() {
        let children = [Node::bytes(b"cat"), Node::bytes(b"dog")];
        let list = Node::list(&children);
        let first = list.encode();
        assert_eq!(list.encoded_size(), first.len() as u64);
        // Second serialization reuses the cached sizes.
        assert_eq!(list.encode(), first);
    }

    #[test]
    fn decode_round_trip() {
        let children = [Node::bytes(b"cat"), Node::integer(1024), Node::bytes(&[])];
        let list = Node::list(&children);
        let encoded = list.encode();

        let mut v = Collect::default();
        decode(&encoded, &mut v).unwrap();
        assert_eq!(
            v.nodes,
            vec![
                (true, encoded[1..].to_vec()),
                (false, b"cat".to_vec()),
                (false, vec![0x04, 0x00]),
                (false, Vec::new()),
            ]
        );
    }

    #[test]
    fn opaque_list_is_not_recursed() {
        struct Opaque(usize);
        impl Visitor for Opaque {
            fn on_node(&mut self, _item: Item<'_>) -> bool {
                self.0 += 1;
                false
            }
        }

        let children = [Node::bytes(b"cat"), Node::bytes(b"dog")];
        let encoded = Node::list(&children).encode();
        let mut v = Opaque(0);
        decode(&encoded, &mut v).unwrap();
        assert_eq!(v.0, 1);
    }

    #[test]
    fn truncated_input_fails() {
        // Claims 5 payload bytes, provides 2.
        assert_eq!(
            decode(&[0x85, 1, 2], &mut Collect::default()),
            Err(RlpError::LengthOverflow)
        );
        // Long-string length field itself cut off.
        assert_eq!(
            decode(&[0xb9, 0x01], &mut Collect::default()),
            Err(RlpError::Truncated)
        );
    }

    #[test]
    fn hash_stream_matches_one_shot() {
        use sha3::{Digest, Keccak256};

        let data: Vec<u8> = (0..u8::MAX).cycle().take(1000).collect();

        // Mixed write sizes exercise buffering, flush, and bypass.
        let mut hs = HashStream::new();
        hs.put_byte(data[0]);
        hs.put(&data[1..40]);
        hs.put(&data[40..140]);
        hs.put(&data[140..500]);
        for &b in &data[500..] {
            hs.put_byte(b);
        }

        let expected = B256::from_slice(&Keccak256::digest(&data));
        assert_eq!(hs.finish(), expected);
    }
}
