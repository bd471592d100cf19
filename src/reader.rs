use std::io::{self, Read, Seek, SeekFrom};

/// Byte-oriented buffered reader over a dump stream that serves both
/// text-line reads and length-framed byte reads without mis-splitting
/// binary content on an embedded `\n` (spec.md §4.1).
///
/// Unlike a naive line reader, a logical line may span more than one
/// internal refill — `readline` keeps pulling from the inner reader until
/// it either finds a `\n` or hits EOF.
pub struct FramedReader<R> {
    inner: R,
    buf: Vec<u8>,
    chunk_size: usize,
}

const DEFAULT_CHUNK_SIZE: usize = 4096;

impl<R: Read + Seek> FramedReader<R> {
    pub fn new(inner: R) -> Self {
        Self::with_chunk_size(inner, DEFAULT_CHUNK_SIZE)
    }

    pub fn with_chunk_size(inner: R, chunk_size: usize) -> Self {
        Self {
            inner,
            buf: Vec::new(),
            chunk_size,
        }
    }

    fn fill_more(&mut self) -> io::Result<usize> {
        let mut chunk = vec![0u8; self.chunk_size];
        let n = self.inner.read(&mut chunk)?;
        chunk.truncate(n);
        self.buf.extend_from_slice(&chunk);
        Ok(n)
    }

    /// Returns the next `\n`-terminated line, newline retained. Returns an
    /// empty string at EOF. A trailing, unterminated line at EOF (malformed
    /// input) is returned as-is rather than silently dropped.
    pub fn readline(&mut self) -> io::Result<String> {
        loop {
            if let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
                let line = self.buf.drain(..=pos).collect::<Vec<u8>>();
                return String::from_utf8(line)
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e));
            }
            if self.fill_more()? == 0 {
                if self.buf.is_empty() {
                    return Ok(String::new());
                }
                let rest = std::mem::take(&mut self.buf);
                return String::from_utf8(rest)
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e));
            }
        }
    }

    /// Returns exactly `n` bytes, spanning the buffer boundary (and as many
    /// refills as necessary) if needed. Fatal short read at EOF.
    pub fn read_exact(&mut self, n: usize) -> io::Result<Vec<u8>> {
        while self.buf.len() < n {
            if self.fill_more()? == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("expected {n} bytes, got {}", self.buf.len()),
                ));
            }
        }
        Ok(self.buf.drain(..n).collect())
    }

    /// Logical position: bytes consumed by the caller, not bytes pulled
    /// from the underlying reader (which may be ahead due to buffering).
    pub fn tell(&mut self) -> io::Result<u64> {
        let inner_pos = self.inner.stream_position()?;
        Ok(inner_pos - self.buf.len() as u64)
    }

    /// Seeks to an absolute logical position, invalidating the buffer.
    pub fn seek(&mut self, pos: u64) -> io::Result<()> {
        self.inner.seek(SeekFrom::Start(pos))?;
        self.buf.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn readline_spans_small_chunks() {
        let data = b"Revision-number: 1\nProp-content-length: 10\n\n".to_vec();
        let mut r = FramedReader::with_chunk_size(Cursor::new(data), 3);
        assert_eq!(r.readline().unwrap(), "Revision-number: 1\n");
        assert_eq!(r.readline().unwrap(), "Prop-content-length: 10\n");
        assert_eq!(r.readline().unwrap(), "\n");
        assert_eq!(r.readline().unwrap(), "");
    }

    #[test]
    fn read_exact_spans_chunk_boundary() {
        let data = b"0123456789ABCDEF".to_vec();
        let mut r = FramedReader::with_chunk_size(Cursor::new(data), 4);
        let chunk = r.read_exact(10).unwrap();
        assert_eq!(chunk, b"0123456789");
        let rest = r.read_exact(6).unwrap();
        assert_eq!(rest, b"ABCDEF");
    }

    #[test]
    fn read_exact_past_eof_errors() {
        let data = b"short".to_vec();
        let mut r = FramedReader::with_chunk_size(Cursor::new(data), 4096);
        assert!(r.read_exact(10).is_err());
    }

    #[test]
    fn tell_and_seek_round_trip() {
        let data = b"abcdefghij".to_vec();
        let mut r = FramedReader::with_chunk_size(Cursor::new(data), 4096);
        let _ = r.read_exact(3).unwrap();
        let pos = r.tell().unwrap();
        assert_eq!(pos, 3);
        r.seek(0).unwrap();
        assert_eq!(r.read_exact(3).unwrap(), b"abc");
        r.seek(pos).unwrap();
        assert_eq!(r.read_exact(2).unwrap(), b"de");
    }
}
