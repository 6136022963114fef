use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

// low-level chunked scanner shared by the header- and body-reading states
//
// grounded on downloader.hpp's use of boost::asio::async_read_until combined
// with its packets_size-bounded streambuf: we never let the working buffer
// grow past chunk_cap, and every read against the wire is subject to the
// same deadline
#[derive(Error, Debug)]
pub enum ScanError {
    #[error("timed out waiting for data")]
    TimedOut,
    #[error("stream closed")]
    Closed,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, PartialEq, Eq)]
pub enum ScanStatus {
    // delimiter found; byte offset of its first byte within the buffer
    Found(usize),

    // chunk_cap reached without finding the delimiter
    BufferFull,
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }

    haystack.windows(needle.len()).position(|w| w == needle)
}

// reads from `stream` into `buf` until `delimiter` appears in `buf`, or until
// `buf` reaches `chunk_cap` bytes without a match
//
// `buf` is treated as already containing any bytes carried over from a
// previous call (e.g. read-ahead from header parsing). bytes already present
// are re-scanned each call; this module never touches the data once queued,
// so the re-scan cost is bounded by chunk_cap
pub async fn read_until<S>(
    stream: &mut S,
    buf: &mut Vec<u8>,
    delimiter: &[u8],
    chunk_cap: usize,
    deadline: Option<Duration>,
) -> Result<ScanStatus, ScanError>
where
    S: AsyncRead + Unpin,
{
    loop {
        if let Some(pos) = find_subslice(buf, delimiter) {
            return Ok(ScanStatus::Found(pos));
        }

        if buf.len() >= chunk_cap {
            return Ok(ScanStatus::BufferFull);
        }

        let mut chunk = vec![0u8; (chunk_cap - buf.len()).min(64 * 1024).max(1)];

        let n = match deadline {
            Some(d) => match tokio::time::timeout(d, stream.read(&mut chunk)).await {
                Ok(res) => res?,
                Err(_) => return Err(ScanError::TimedOut),
            },
            None => stream.read(&mut chunk).await?,
        };

        if n == 0 {
            return Err(ScanError::Closed);
        }

        buf.extend_from_slice(&chunk[..n]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn finds_delimiter_already_in_buffer() {
        let mut stream = Cursor::new(Vec::<u8>::new());
        let mut buf = b"hello\r\n\r\nworld".to_vec();

        let status = read_until(&mut stream, &mut buf, b"\r\n\r\n", 1024, None)
            .await
            .unwrap();

        assert_eq!(status, ScanStatus::Found(5));
    }

    #[tokio::test]
    async fn reads_until_delimiter_arrives() {
        let mut stream = Cursor::new(b"more-data\r\n\r\ntail".to_vec());
        let mut buf = Vec::new();

        let status = read_until(&mut stream, &mut buf, b"\r\n\r\n", 1024, None)
            .await
            .unwrap();

        assert_eq!(status, ScanStatus::Found(9));
    }

    #[tokio::test]
    async fn reports_buffer_full_when_cap_reached_without_match() {
        let mut stream = Cursor::new(b"xxxxxxxxxxxxxxxxxxxx".to_vec());
        let mut buf = Vec::new();

        let status = read_until(&mut stream, &mut buf, b"\r\n\r\n", 8, None)
            .await
            .unwrap();

        assert_eq!(status, ScanStatus::BufferFull);
        assert_eq!(buf.len(), 8);
    }

    #[tokio::test]
    async fn reports_closed_on_empty_stream() {
        let mut stream = Cursor::new(Vec::<u8>::new());
        let mut buf = Vec::new();

        let err = read_until(&mut stream, &mut buf, b"\r\n\r\n", 1024, None)
            .await
            .unwrap_err();

        assert!(matches!(err, ScanError::Closed));
    }
}
