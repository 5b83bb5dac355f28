//! Incremental command parsing.
//!
//! A [`Parser`] is owned by exactly one connection. Each call to
//! [`Parser::parse`] appends the received chunk to an internal accumulation
//! buffer and greedily decodes RESP values from the front. Complete values
//! that form a command (an array of bulk strings) are returned; a partial
//! value stays buffered until more bytes arrive. Consumed bytes are
//! discarded after every call.

use bytes::{Buf, Bytes, BytesMut};

use crate::error::ParseError;
use crate::value::{self, Value};

/// A parsed command: the ordered bulk-string arguments, name first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    args: Vec<Bytes>,
}

impl Command {
    /// Build a command from decoded arguments. Intended for tests and
    /// clients; the server side goes through [`Parser::parse`].
    pub fn new(args: Vec<Bytes>) -> Self {
        debug_assert!(!args.is_empty());
        Command { args }
    }

    /// The command name (the first argument), as received.
    #[inline]
    pub fn name(&self) -> &[u8] {
        &self.args[0]
    }

    /// All arguments, name included.
    #[inline]
    pub fn args(&self) -> &[Bytes] {
        &self.args
    }

    /// Serialize as a RESP array of bulk strings.
    pub fn encode(&self, out: &mut BytesMut) {
        let mut len_buf = itoa::Buffer::new();
        out.extend_from_slice(b"*");
        out.extend_from_slice(len_buf.format(self.args.len()).as_bytes());
        out.extend_from_slice(b"\r\n");
        for arg in &self.args {
            out.extend_from_slice(b"$");
            out.extend_from_slice(len_buf.format(arg.len()).as_bytes());
            out.extend_from_slice(b"\r\n");
            out.extend_from_slice(arg);
            out.extend_from_slice(b"\r\n");
        }
    }

    /// Convert a decoded value into a command, if it has the right shape.
    ///
    /// Only a non-empty array whose elements are all bulk strings qualifies.
    fn from_value(value: Value) -> Option<Command> {
        match value {
            Value::Array(elements) if !elements.is_empty() => {
                let mut args = Vec::with_capacity(elements.len());
                for element in elements {
                    match element {
                        Value::Bulk(data) => args.push(data),
                        _ => return None,
                    }
                }
                Some(Command { args })
            }
            _ => None,
        }
    }
}

/// Incremental, resumable RESP command parser.
pub struct Parser {
    buf: BytesMut,
    initial_capacity: usize,
}

impl Parser {
    /// Create a parser whose accumulation buffer starts at
    /// `initial_capacity` bytes.
    pub fn new(initial_capacity: usize) -> Self {
        Parser {
            buf: BytesMut::with_capacity(initial_capacity),
            initial_capacity,
        }
    }

    /// Number of bytes currently buffered (unconsumed).
    #[inline]
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Current accumulation buffer capacity.
    #[inline]
    pub fn buffer_capacity(&self) -> usize {
        self.buf.capacity()
    }

    /// Drop all buffered bytes and shrink the buffer back to its initial
    /// capacity if it has grown past twice that.
    pub fn reset(&mut self) {
        self.buf.clear();
        if self.buf.capacity() > self.initial_capacity * 2 {
            self.buf = BytesMut::with_capacity(self.initial_capacity);
        }
    }

    /// Replace the accumulation buffer, returning the old one.
    ///
    /// Used by the context pool to recycle oversize buffers. Any buffered
    /// bytes are discarded, so this must only be called on an idle parser.
    pub fn swap_buffer(&mut self, mut replacement: BytesMut) -> BytesMut {
        replacement.clear();
        std::mem::replace(&mut self.buf, replacement)
    }

    /// Feed a chunk of bytes and return every command completed by it.
    ///
    /// Incomplete trailing data is kept for the next call and never causes
    /// an error. A byte that is not a valid type tag is skipped and parsing
    /// continues. An unparseable length resets the parser and surfaces the
    /// error so the caller can synthesize a protocol-error reply.
    pub fn parse(&mut self, chunk: &[u8]) -> Result<Vec<Command>, ParseError> {
        self.buf.extend_from_slice(chunk);

        let mut commands = Vec::new();
        let mut cursor = 0usize;

        while cursor < self.buf.len() {
            match value::decode(&self.buf[cursor..]) {
                Ok(Some((value, consumed))) => {
                    cursor += consumed;
                    if let Some(command) = Command::from_value(value) {
                        commands.push(command);
                    }
                }
                Ok(None) => break,
                Err(ParseError::BadTypeTag(_)) => {
                    cursor += 1;
                }
                Err(e) => {
                    self.reset();
                    return Err(e);
                }
            }
        }

        self.buf.advance(cursor);
        self.compact();
        Ok(commands)
    }

    /// Shrink the buffer when it has grown large and mostly drained: past
    /// 4x the initial capacity with under 25% fill, reallocate at
    /// max(initial, 2x the unread length). Otherwise `advance` has already
    /// moved the unread bytes toward the front of the window.
    fn compact(&mut self) {
        let cap = self.buf.capacity();
        let len = self.buf.len();
        if cap > self.initial_capacity * 4 && len * 4 < cap {
            let target = (len * 2).max(self.initial_capacity);
            let mut replacement = BytesMut::with_capacity(target);
            replacement.extend_from_slice(&self.buf);
            self.buf = replacement;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cmd(args: &[&[u8]]) -> Command {
        Command::new(args.iter().map(|a| Bytes::copy_from_slice(a)).collect())
    }

    #[test]
    fn test_parse_single_command() {
        let mut parser = Parser::new(4096);
        let commands = parser.parse(b"*2\r\n$3\r\nGET\r\n$3\r\nfoo\r\n").unwrap();
        assert_eq!(commands, vec![cmd(&[b"GET", b"foo"])]);
        assert_eq!(parser.buffered(), 0);
    }

    #[test]
    fn test_parse_incomplete_returns_empty() {
        let mut parser = Parser::new(4096);
        assert!(parser.parse(b"*2\r\n$3\r\nGE").unwrap().is_empty());
        assert!(parser.parse(b"").unwrap().is_empty());
        assert_eq!(parser.buffered(), 10);
    }

    #[test]
    fn test_parse_fragmented() {
        let mut parser = Parser::new(4096);
        assert!(parser.parse(b"*2\r\n$3\r\nGE").unwrap().is_empty());
        assert!(parser.parse(b"T\r\n$3\r\nfoo").unwrap().is_empty());
        let commands = parser.parse(b"\r\n").unwrap();
        assert_eq!(commands, vec![cmd(&[b"GET", b"foo"])]);
        assert_eq!(parser.buffered(), 0);
    }

    #[test]
    fn test_parse_pipelined() {
        let mut parser = Parser::new(4096);
        let commands = parser
            .parse(b"*3\r\n$3\r\nSET\r\n$1\r\na\r\n$1\r\n1\r\n*2\r\n$3\r\nGET\r\n$1\r\na\r\n")
            .unwrap();
        assert_eq!(
            commands,
            vec![cmd(&[b"SET", b"a", b"1"]), cmd(&[b"GET", b"a"])]
        );
    }

    #[test]
    fn test_parse_complete_plus_partial() {
        let mut parser = Parser::new(4096);
        let commands = parser
            .parse(b"*2\r\n$3\r\nGET\r\n$3\r\nfoo\r\n*2\r\n$3\r\nGET\r\n$3\r\nba")
            .unwrap();
        assert_eq!(commands, vec![cmd(&[b"GET", b"foo"])]);
        let commands = parser.parse(b"r\r\n").unwrap();
        assert_eq!(commands, vec![cmd(&[b"GET", b"bar"])]);
    }

    #[test]
    fn test_parse_skips_bad_tag() {
        let mut parser = Parser::new(4096);
        // Garbage byte between two well-formed commands.
        let commands = parser
            .parse(b"*2\r\n$3\r\nGET\r\n$1\r\na\r\nX*2\r\n$3\r\nGET\r\n$1\r\nb\r\n")
            .unwrap();
        assert_eq!(commands, vec![cmd(&[b"GET", b"a"]), cmd(&[b"GET", b"b"])]);
    }

    #[test]
    fn test_parse_bad_length_resets() {
        let mut parser = Parser::new(4096);
        let err = parser.parse(b"*zz\r\n").unwrap_err();
        assert_eq!(err, ParseError::InvalidLength);
        assert_eq!(parser.buffered(), 0);
        // Parser is usable again afterwards.
        let commands = parser.parse(b"*2\r\n$3\r\nGET\r\n$1\r\nk\r\n").unwrap();
        assert_eq!(commands, vec![cmd(&[b"GET", b"k"])]);
    }

    #[test]
    fn test_parse_discards_non_command_values() {
        let mut parser = Parser::new(4096);
        // A simple string and a null array are complete values but not
        // commands; they are consumed and dropped.
        let commands = parser
            .parse(b"+hello\r\n*-1\r\n*2\r\n$3\r\nGET\r\n$1\r\nk\r\n")
            .unwrap();
        assert_eq!(commands, vec![cmd(&[b"GET", b"k"])]);
    }

    #[test]
    fn test_parse_array_with_non_bulk_element_not_a_command() {
        let mut parser = Parser::new(4096);
        let commands = parser.parse(b"*2\r\n:1\r\n$1\r\nk\r\n").unwrap();
        assert!(commands.is_empty());
        assert_eq!(parser.buffered(), 0);
    }

    #[test]
    fn test_round_trip_arbitrary_partitions() {
        // Serialize a command sequence, then feed it to the parser in every
        // fixed chunk size from 1 byte up. The emitted commands must always
        // equal the original sequence.
        let original = vec![
            cmd(&[b"SET", b"foo", b"bar"]),
            cmd(&[b"GET", b"foo"]),
            cmd(&[b"MSET", b"a", b"1", b"b", b"2"]),
            cmd(&[b"MGET", b"a", b"b", b"missing"]),
            cmd(&[b"DEL", b"foo"]),
        ];
        let mut wire = BytesMut::new();
        for c in &original {
            c.encode(&mut wire);
        }

        for chunk_size in 1..=wire.len() {
            let mut parser = Parser::new(64);
            let mut emitted = Vec::new();
            for chunk in wire.chunks(chunk_size) {
                emitted.extend(parser.parse(chunk).unwrap());
            }
            assert_eq!(emitted, original, "chunk size {}", chunk_size);
            assert_eq!(parser.buffered(), 0);
        }
    }

    #[test]
    fn test_binary_safe_arguments() {
        let mut parser = Parser::new(64);
        // Values may contain CR, LF and NUL bytes.
        let payload = b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$5\r\na\r\nb\x00\r\n";
        let commands = parser.parse(payload).unwrap();
        assert_eq!(commands, vec![cmd(&[b"SET", b"k", b"a\r\nb\x00"])]);
    }

    #[test]
    fn test_buffer_compaction_after_large_burst() {
        let mut parser = Parser::new(64);
        let mut wire = BytesMut::new();
        for i in 0..200 {
            let key = format!("key-{}", i);
            cmd(&[b"GET", key.as_bytes()]).encode(&mut wire);
        }
        let commands = parser.parse(&wire).unwrap();
        assert_eq!(commands.len(), 200);
        assert_eq!(parser.buffered(), 0);
        // A fully drained parser should not hold on to a burst-sized buffer.
        parser.reset();
        assert!(parser.buffer_capacity() <= 64 * 2);
    }
}
