//! Per-connection transport plumbing: LF line framing over a non-blocking
//! socket, the CRC prefix, and the write-all loop.

use std::io::{self, Read, Write};

/// Per-connection receive buffer.
pub const READ_BUFFER_SIZE: usize = 1 << 14;

/// Longest accepted command line; anything longer is a protocol violation
/// and closes the connection.
pub const MAX_COMMAND_LEN: usize = 1 << 10;

/// One `next_line` step.
pub enum LineStatus<'a> {
    /// A complete line, LF stripped.
    Line(&'a [u8]),
    /// No complete line buffered and the socket has no more data for now.
    Pending,
    /// Orderly remote close.
    Closed,
}

/// LF-framed reader over a non-blocking stream. Exposes one request line
/// at a time; partial lines are compacted to the buffer front between
/// reads.
pub struct LineReader {
    buf: Box<[u8; READ_BUFFER_SIZE]>,
    start: usize,
    len: usize,
}

impl LineReader {
    pub fn new() -> Self {
        Self {
            buf: Box::new([0u8; READ_BUFFER_SIZE]),
            start: 0,
            len: 0,
        }
    }

    /// Frame the next request line, pulling from `stream` as needed.
    /// Reads until `WouldBlock`, as edge-triggered readiness requires.
    pub fn next_line<'a>(&'a mut self, stream: &mut impl Read) -> io::Result<LineStatus<'a>> {
        loop {
            if let Some(pos) = self.buf[self.start..self.start + self.len]
                .iter()
                .position(|&b| b == b'\n')
            {
                let line_start = self.start;
                self.start += pos + 1;
                self.len -= pos + 1;
                return Ok(LineStatus::Line(&self.buf[line_start..line_start + pos]));
            }

            if self.len > MAX_COMMAND_LEN {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "command exceeds maximum length",
                ));
            }

            if self.start > 0 {
                self.buf.copy_within(self.start..self.start + self.len, 0);
                self.start = 0;
            }

            match stream.read(&mut self.buf[self.len..]) {
                Ok(0) => return Ok(LineStatus::Closed),
                Ok(n) => self.len += n,
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    return Ok(LineStatus::Pending)
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }
}

impl Default for LineReader {
    fn default() -> Self {
        Self::new()
    }
}

/// Strip a leading `<decimal-u32>#` integrity prefix. Returns the CRC (if
/// present and well-formed) and the remaining command body; a malformed
/// prefix leaves the line untouched for the verb dispatch to reject.
pub fn consume_crc_prefix(line: &[u8]) -> (Option<u32>, &[u8]) {
    if line.first().map_or(true, |b| !b.is_ascii_digit()) {
        return (None, line);
    }
    let Some(hash_pos) = line.iter().position(|&b| b == b'#') else {
        return (None, line);
    };

    let mut crc = 0u64;
    for &byte in &line[..hash_pos] {
        if !byte.is_ascii_digit() {
            return (None, line);
        }
        crc = crc * 10 + u64::from(byte - b'0');
        if crc > u64::from(u32::MAX) {
            return (None, line);
        }
    }
    (Some(crc as u32), &line[hash_pos + 1..])
}

/// Write the entire response, retrying partial and would-block writes.
pub fn write_all(stream: &mut impl Write, mut buf: &[u8]) -> io::Result<()> {
    while !buf.is_empty() {
        match stream.write(buf) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "connection closed mid-response",
                ))
            }
            Ok(n) => buf = &buf[n..],
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => core::hint::spin_loop(),
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}
