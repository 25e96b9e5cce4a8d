//! Request parsing and per-connection dispatch through the redundancy
//! primitive.
//!
//! The wire format is fixed-width: `set <key> <val>`, `get <key>`,
//! `del <key>`, `quit`. Keys and values are sliced by offset: the parser
//! never scans for delimiters inside key or value bytes.

use mio::net::TcpStream;

use crate::runtime::Session;
use crate::store::{DelCall, GetCall, HashTable, Key, ReplyCode, SetCall, Val, KEY_LEN, VAL_LEN};

use super::conn::{consume_crc_prefix, write_all, LineReader, LineStatus};

/// Per-connection response buffer.
pub const WRITE_BUFFER_SIZE: usize = 1 << 14;

/// Boundary into optional integrity layers (a CRC-checked transactional
/// region, a replica shipper). The single-process deployment parses the
/// CRC prefix and hands it through here without acting on it.
pub trait RequestGuard: Send + Sync {
    fn enter(&self, _crc: Option<u32>, _body: &[u8]) {}
    fn exit(&self) {}
}

/// Default guard: no integrity layer configured.
pub struct NullGuard;

impl RequestGuard for NullGuard {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Request {
    Set(Key, Val),
    Get(Key),
    Del(Key),
    Quit,
    Malformed,
}

/// Dispatch on the first byte; slice arguments at build-time offsets.
pub(crate) fn parse_request(body: &[u8]) -> Request {
    if body.starts_with(b"quit") {
        return Request::Quit;
    }
    match body.first() {
        Some(b's') if body.len() >= 4 + KEY_LEN + 1 + VAL_LEN => {
            let key = key_at(body, 4);
            let val = Val::new(
                body[4 + KEY_LEN + 1..4 + KEY_LEN + 1 + VAL_LEN]
                    .try_into()
                    .expect("sliced VAL_LEN bytes"),
            );
            Request::Set(key, val)
        }
        Some(b'g') if body.len() >= 4 + KEY_LEN => Request::Get(key_at(body, 4)),
        Some(b'd') if body.len() >= 4 + KEY_LEN => Request::Del(key_at(body, 4)),
        _ => Request::Malformed,
    }
}

#[inline]
fn key_at(body: &[u8], offset: usize) -> Key {
    Key::new(
        body[offset..offset + KEY_LEN]
            .try_into()
            .expect("sliced KEY_LEN bytes"),
    )
}

/// One accepted connection: its stream, its line framer, and its response
/// buffer. The connection walks ACCEPTED → READING → DISPATCHING →
/// WRITING → READING…; `drain` runs that machine until the socket has no
/// complete request left.
pub(crate) struct Worker {
    stream: TcpStream,
    reader: LineReader,
    wbuf: Box<[u8; WRITE_BUFFER_SIZE]>,
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Drained {
    Keep,
    Close,
}

impl Worker {
    pub(crate) fn new(stream: TcpStream) -> Self {
        Self {
            stream,
            reader: LineReader::new(),
            wbuf: Box::new([0u8; WRITE_BUFFER_SIZE]),
        }
    }

    pub(crate) fn stream_mut(&mut self) -> &mut TcpStream {
        &mut self.stream
    }

    /// Serve every complete request currently buffered or readable.
    pub(crate) fn drain(
        &mut self,
        session: &mut Session,
        table: &HashTable,
        guard: &dyn RequestGuard,
    ) -> Drained {
        loop {
            let line = match self.reader.next_line(&mut self.stream) {
                Ok(LineStatus::Line(line)) => line,
                Ok(LineStatus::Pending) => return Drained::Keep,
                Ok(LineStatus::Closed) => return Drained::Close,
                Err(err) => {
                    tracing::debug!(target: "remora::server", %err, "transport error");
                    return Drained::Close;
                }
            };

            let (crc, body) = consume_crc_prefix(line);
            guard.enter(crc, body);
            let written = dispatch_one(body, session, table, &mut self.wbuf);
            guard.exit();

            let len = match written {
                Some(len) => len,
                None => return Drained::Close,
            };
            if write_all(&mut self.stream, &self.wbuf[..len]).is_err() {
                return Drained::Close;
            }
        }
    }
}

/// Run one request through `run2` and format its response. `None` means
/// `quit`: close without responding.
fn dispatch_one(
    body: &[u8],
    session: &mut Session,
    table: &HashTable,
    wbuf: &mut [u8; WRITE_BUFFER_SIZE],
) -> Option<usize> {
    let len = match parse_request(body) {
        Request::Quit => return None,
        Request::Set(key, val) => {
            let ret = session.run2(SetCall { key, val }, |call, rec| {
                table.set(&call.key, &call.val, rec)
            });
            put(wbuf, ret.wire())
        }
        Request::Get(key) => {
            let reply = session.run2(GetCall { key }, |call, rec| table.get(&call.key, rec));
            if reply.is_hit() {
                format_value_line(wbuf, &reply.val)
            } else {
                put(wbuf, ReplyCode::NOT_FOUND.wire())
            }
        }
        Request::Del(key) => {
            let ret = session.run2(DelCall { key }, |call, rec| table.del(&call.key, rec));
            put(wbuf, ret.wire())
        }
        Request::Malformed => put(wbuf, ReplyCode::ERROR.wire()),
    };
    Some(len)
}

#[inline]
fn put(wbuf: &mut [u8; WRITE_BUFFER_SIZE], response: &[u8]) -> usize {
    wbuf[..response.len()].copy_from_slice(response);
    response.len()
}

fn format_value_line(wbuf: &mut [u8; WRITE_BUFFER_SIZE], val: &Val) -> usize {
    const PREFIX: &[u8] = b"VALUE ";
    wbuf[..PREFIX.len()].copy_from_slice(PREFIX);
    wbuf[PREFIX.len()..PREFIX.len() + VAL_LEN].copy_from_slice(&val.0);
    wbuf[PREFIX.len() + VAL_LEN..PREFIX.len() + VAL_LEN + 2].copy_from_slice(b"\r\n");
    PREFIX.len() + VAL_LEN + 2
}

pub(crate) fn close_worker(registry: &mio::Registry, mut worker: Worker) {
    if let Err(err) = registry.deregister(worker.stream_mut()) {
        tracing::debug!(target: "remora::server", %err, "deregister failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_set() {
        let req = parse_request(b"set abcd 12345678\r");
        assert_eq!(
            req,
            Request::Set(Key::new(*b"abcd"), Val::new(*b"12345678"))
        );
    }

    #[test]
    fn test_parse_get_del() {
        assert_eq!(parse_request(b"get abcd\r"), Request::Get(Key::new(*b"abcd")));
        assert_eq!(parse_request(b"del abcd\r"), Request::Del(Key::new(*b"abcd")));
    }

    #[test]
    fn test_parse_quit() {
        assert_eq!(parse_request(b"quit"), Request::Quit);
    }

    #[test]
    fn test_parse_unknown_verb() {
        assert_eq!(parse_request(b"foo abcd 00000000\r"), Request::Malformed);
        assert_eq!(parse_request(b""), Request::Malformed);
    }

    #[test]
    fn test_parse_truncated_set_is_malformed() {
        assert_eq!(parse_request(b"set abcd 123"), Request::Malformed);
        assert_eq!(parse_request(b"get ab"), Request::Malformed);
    }

    #[test]
    fn test_value_line_format() {
        let mut wbuf = Box::new([0u8; WRITE_BUFFER_SIZE]);
        let len = format_value_line(&mut wbuf, &Val::new(*b"ABCDEFGH"));
        assert_eq!(&wbuf[..len], b"VALUE ABCDEFGH\r\n");
    }
}
