//! Reply encoding.
//!
//! Helpers that append RESP reply frames directly to an output buffer. The
//! write path concatenates many replies into one connection write buffer, so
//! everything here works in terms of `extend_from_slice` on a shared
//! `BytesMut`.

use bytes::BytesMut;

/// `+OK\r\n`
#[inline]
pub fn ok(out: &mut BytesMut) {
    out.extend_from_slice(b"+OK\r\n");
}

/// `+<text>\r\n`
#[inline]
pub fn simple(out: &mut BytesMut, text: &str) {
    out.reserve(text.len() + 3);
    out.extend_from_slice(b"+");
    out.extend_from_slice(text.as_bytes());
    out.extend_from_slice(b"\r\n");
}

/// `-<message>\r\n`
#[inline]
pub fn error(out: &mut BytesMut, message: &str) {
    out.reserve(message.len() + 3);
    out.extend_from_slice(b"-");
    out.extend_from_slice(message.as_bytes());
    out.extend_from_slice(b"\r\n");
}

/// `:<n>\r\n`
#[inline]
pub fn integer(out: &mut BytesMut, n: i64) {
    let mut digits = itoa::Buffer::new();
    let digits = digits.format(n);
    out.reserve(digits.len() + 3);
    out.extend_from_slice(b":");
    out.extend_from_slice(digits.as_bytes());
    out.extend_from_slice(b"\r\n");
}

/// `$<len>\r\n<data>\r\n`
#[inline]
pub fn bulk(out: &mut BytesMut, data: &[u8]) {
    let mut digits = itoa::Buffer::new();
    let digits = digits.format(data.len());
    out.reserve(1 + digits.len() + 2 + data.len() + 2);
    out.extend_from_slice(b"$");
    out.extend_from_slice(digits.as_bytes());
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(data);
    out.extend_from_slice(b"\r\n");
}

/// `$-1\r\n`
#[inline]
pub fn null_bulk(out: &mut BytesMut) {
    out.extend_from_slice(b"$-1\r\n");
}

/// `*-1\r\n`
#[inline]
pub fn null_array(out: &mut BytesMut) {
    out.extend_from_slice(b"*-1\r\n");
}

/// `*<count>\r\n` — elements follow.
#[inline]
pub fn array_header(out: &mut BytesMut, count: usize) {
    let mut digits = itoa::Buffer::new();
    let digits = digits.format(count);
    out.reserve(digits.len() + 3);
    out.extend_from_slice(b"*");
    out.extend_from_slice(digits.as_bytes());
    out.extend_from_slice(b"\r\n");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ok() {
        let mut out = BytesMut::new();
        ok(&mut out);
        assert_eq!(&out[..], b"+OK\r\n");
    }

    #[test]
    fn test_error() {
        let mut out = BytesMut::new();
        error(&mut out, "ERR unknown command 'foo'");
        assert_eq!(&out[..], b"-ERR unknown command 'foo'\r\n");
    }

    #[test]
    fn test_integer() {
        let mut out = BytesMut::new();
        integer(&mut out, 1);
        integer(&mut out, 0);
        integer(&mut out, -7);
        assert_eq!(&out[..], b":1\r\n:0\r\n:-7\r\n");
    }

    #[test]
    fn test_bulk() {
        let mut out = BytesMut::new();
        bulk(&mut out, b"bar");
        assert_eq!(&out[..], b"$3\r\nbar\r\n");
    }

    #[test]
    fn test_null_bulk_and_array() {
        let mut out = BytesMut::new();
        null_bulk(&mut out);
        null_array(&mut out);
        assert_eq!(&out[..], b"$-1\r\n*-1\r\n");
    }

    #[test]
    fn test_array_with_elements() {
        let mut out = BytesMut::new();
        array_header(&mut out, 2);
        bulk(&mut out, b"1");
        null_bulk(&mut out);
        assert_eq!(&out[..], b"*2\r\n$1\r\n1\r\n$-1\r\n");
    }

    #[test]
    fn test_replies_concatenate() {
        let mut out = BytesMut::new();
        ok(&mut out);
        bulk(&mut out, b"bar");
        assert_eq!(&out[..], b"+OK\r\n$3\r\nbar\r\n");
    }
}
