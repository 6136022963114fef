use std::path::PathBuf;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tracing::{debug, instrument, warn, Level};

use super::dest::resolve_destination;
use super::error::{DownloadFault, ReceiverError};
use super::scan::{read_until, ScanStatus};

const HEADER_DELIMITER: &[u8] = b"\r\n\r\n";
const AFTER_PART_TERMINATOR: &[u8] = b"--\r\n";
const FILENAME_MARKER: &str = "filename=\"";

// called once a part's `filename=` value and destination path are known, and
// again (with the owned, confirmed output path) once the part's body has
// been fully written. failures from either are treated as an aborted
// operation, matching on_read_file_header_handler/on_read_file_body_handler
// in the downloader this module is modeled on
pub type OnHeader<'a> = dyn FnMut(&str) -> anyhow::Result<Option<PathBuf>> + Send + 'a;
pub type OnBody<'a> = dyn FnMut(&std::path::Path) -> anyhow::Result<()> + Send + 'a;

pub struct DownloadSettings<'a> {
    pub output_directory: PathBuf,
    pub chunk_cap: usize,
    pub timeout: Option<Duration>,
    pub on_header: Option<Box<OnHeader<'a>>>,
    pub on_body: Option<Box<OnBody<'a>>>,
}

impl<'a> Default for DownloadSettings<'a> {
    fn default() -> Self {
        DownloadSettings {
            output_directory: PathBuf::from("."),
            chunk_cap: 10 * 1024 * 1024,
            timeout: Some(Duration::from_secs(30)),
            on_header: None,
            on_body: None,
        }
    }
}

// streams a multipart/form-data request body to disk, one part at a time,
// never holding more than chunk_cap bytes of the request in memory at once
//
// a single call to download() drives the whole state machine: awaiting the
// first boundary, reading a part's header, reading its body, then checking
// whether another part follows or the terminating boundary has arrived
pub struct MultipartReceiver<'a, S> {
    stream: &'a mut S,
    buf: Vec<u8>,
    settings: DownloadSettings<'a>,
    result_paths: Vec<PathBuf>,

    // the destination of the part currently being written, if any -- set the
    // moment its path is pushed onto result_paths, cleared only once the part
    // is fully committed (body written, sink closed, on_body callback
    // succeeded). a fault while this is Some means a partial file needs
    // cleanup; a fault while it is None means every completed file is final
    current_path: Option<PathBuf>,
}

impl<'a, S> MultipartReceiver<'a, S>
where
    S: AsyncRead + Unpin,
{
    pub fn new(stream: &'a mut S, settings: DownloadSettings<'a>) -> Self {
        MultipartReceiver {
            stream,
            buf: Vec::new(),
            settings,
            result_paths: Vec::new(),
            current_path: None,
        }
    }

    // feeds in bytes already consumed off the wire while parsing request
    // headers, before the caller handed the stream over to us
    pub fn seed(mut self, carry: Vec<u8>) -> Self {
        self.buf = carry;
        self
    }

    // on success, every destination written. on fault, the fault kind plus
    // every destination that was fully written and flushed before it struck
    // -- the part in flight at the time of the fault, if any, has already
    // been unlinked and is not among them
    #[instrument(level=Level::DEBUG, skip(self, content_type))]
    pub async fn download(mut self, content_type: &str) -> Result<Vec<PathBuf>, DownloadFault> {
        let boundary = match extract_boundary(content_type) {
            Ok(boundary) => boundary,
            Err(error) => return Err(DownloadFault { error, paths: Vec::new() }),
        };

        if boundary.len() >= self.settings.chunk_cap {
            return Err(DownloadFault {
                error: ReceiverError::InvalidStructure,
                paths: Vec::new(),
            });
        }

        match self.run(&boundary).await {
            Ok(()) => Ok(self.result_paths),
            Err(error) => {
                self.abort_current_file().await;
                Err(DownloadFault { error, paths: self.result_paths })
            }
        }
    }

    // blocking adapter over the same state machine, for callers that are not
    // themselves async. tokio has one I/O stack, not two, so this is a thin
    // wrapper rather than a second implementation -- requires a multi-thread
    // runtime (block_in_place panics on a current-thread one)
    pub fn download_blocking(self, content_type: &str) -> Result<Vec<PathBuf>, DownloadFault> {
        tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current().block_on(self.download(content_type))
        })
    }

    async fn run(&mut self, boundary: &[u8]) -> Result<(), ReceiverError> {
        // awaiting-first-boundary: consume everything up through and
        // including the first occurrence of the boundary token
        match read_until(
            self.stream,
            &mut self.buf,
            boundary,
            self.settings.chunk_cap,
            self.settings.timeout,
        )
        .await
        {
            Ok(ScanStatus::Found(pos)) => {
                self.buf.drain(..pos + boundary.len());
            }
            Ok(ScanStatus::BufferFull) => return Err(ReceiverError::InvalidStructure),
            Err(err) => return Err(err.into()),
        }

        loop {
            let filename = self.read_header().await?;
            self.read_body(boundary, &filename).await?;

            if self.is_after_part_terminator().await? {
                return Ok(());
            }
        }
    }

    // reading-header: scan ahead to the blank line separating a part's
    // headers from its body, then pull `filename="..."` out of it
    async fn read_header(&mut self) -> Result<String, ReceiverError> {
        let pos = match read_until(
            self.stream,
            &mut self.buf,
            HEADER_DELIMITER,
            self.settings.chunk_cap,
            self.settings.timeout,
        )
        .await
        {
            Ok(ScanStatus::Found(pos)) => pos,
            Ok(ScanStatus::BufferFull) => return Err(ReceiverError::InvalidStructure),
            Err(err) => return Err(err.into()),
        };

        let header_bytes: Vec<u8> = self.buf.drain(..pos + HEADER_DELIMITER.len()).collect();
        let header = String::from_utf8_lossy(&header_bytes);

        let start = header.find(FILENAME_MARKER).ok_or(ReceiverError::InvalidStructure)?
            + FILENAME_MARKER.len();

        let rest = &header[start..];
        let end = rest.rfind('"').ok_or(ReceiverError::InvalidStructure)?;

        Ok(rest[..end].to_owned())
    }

    // reading-body: scan ahead to the next occurrence of the boundary token,
    // writing every chunk to disk as it arrives so we never hold more than
    // chunk_cap bytes of the body in memory at once
    async fn read_body(&mut self, boundary: &[u8], filename: &str) -> Result<(), ReceiverError> {
        let override_path = match &mut self.settings.on_header {
            Some(cb) => cb(filename).map_err(|_| ReceiverError::OperationAborted)?,
            None => None,
        };

        let path = resolve_destination(filename, &self.settings.output_directory, override_path)
            .await?;

        let mut sink = tokio::fs::File::create(&path).await?;
        self.result_paths.push(path.clone());
        self.current_path = Some(path.clone());

        loop {
            match read_until(
                self.stream,
                &mut self.buf,
                boundary,
                self.settings.chunk_cap,
                self.settings.timeout,
            )
            .await
            {
                Ok(ScanStatus::Found(pos)) => {
                    // the four bytes just before the boundary token ("\r\n--")
                    // are part of the delimiter, not the file's contents --
                    // the boundary token itself doesn't include them
                    let body_len = pos.saturating_sub(4);
                    sink.write_all(&self.buf[..body_len]).await?;
                    self.buf.drain(..pos + boundary.len());
                    break;
                }
                Ok(ScanStatus::BufferFull) => {
                    let keep = boundary.len();
                    let write_len = self.buf.len() - keep;
                    sink.write_all(&self.buf[..write_len]).await?;
                    self.buf.drain(..write_len);
                }
                Err(err) => return Err(err.into()),
            }
        }

        sink.flush().await?;
        drop(sink);

        if let Some(cb) = &mut self.settings.on_body {
            cb(&path).map_err(|_| ReceiverError::OperationAborted)?;
        }

        self.current_path = None;
        Ok(())
    }

    // after-part: the two bytes following a boundary are either "--" (no
    // more parts; the request body is over) or "\r\n" (another part's
    // header follows). this is an exact string comparison against the
    // literal terminator, matching the source this module is modeled on
    async fn is_after_part_terminator(&mut self) -> Result<bool, ReceiverError> {
        while self.buf.len() < AFTER_PART_TERMINATOR.len() {
            let mut chunk = vec![0u8; AFTER_PART_TERMINATOR.len() - self.buf.len()];

            let n = match self.settings.timeout {
                Some(d) => match tokio::time::timeout(d, self.stream.read(&mut chunk)).await {
                    Ok(res) => res?,
                    Err(_) => return Err(ReceiverError::TimedOut),
                },
                None => self.stream.read(&mut chunk).await?,
            };

            if n == 0 {
                return Err(ReceiverError::Closed);
            }

            self.buf.extend_from_slice(&chunk[..n]);
        }

        if &self.buf[..AFTER_PART_TERMINATOR.len()] == AFTER_PART_TERMINATOR {
            self.buf.drain(..AFTER_PART_TERMINATOR.len());
            return Ok(true);
        }

        Ok(false)
    }

    // only a part that was actually in flight at the time of the fault gets
    // cleaned up -- a fault in reading-header or after-part (no file open)
    // must leave every already-completed file in result_paths untouched
    async fn abort_current_file(&mut self) {
        let Some(path) = self.current_path.take() else {
            debug!("multipart download aborted with no part in flight");
            return;
        };

        if self.result_paths.last() == Some(&path) {
            self.result_paths.pop();
        }

        if let Err(err) = tokio::fs::remove_file(&path).await {
            warn!(path = %path.display(), %err, "failed to remove partially written upload");
        }

        debug!("multipart download aborted");
    }
}

fn extract_boundary(content_type: &str) -> Result<Vec<u8>, ReceiverError> {
    if !content_type.contains("multipart/form-data") {
        return Err(ReceiverError::NotMultipartFormData);
    }

    let marker = "boundary=";
    let pos = content_type.find(marker).ok_or(ReceiverError::InvalidStructure)?;
    let raw = &content_type[pos + marker.len()..];

    if raw.is_empty() || raw.len() > 70 {
        return Err(ReceiverError::InvalidStructure);
    }

    // the delimiter scanned against in the body is the boundary token
    // itself, not "--" + token: the leading "--" that precedes every
    // occurrence on the wire is accounted for separately in the body-write
    // arithmetic below
    Ok(raw.as_bytes().to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn body(parts: &[(&str, &[u8])], boundary: &str) -> Vec<u8> {
        let mut out = Vec::new();

        for (filename, data) in parts {
            out.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
            out.extend_from_slice(
                format!(
                    "Content-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\n"
                )
                .as_bytes(),
            );
            out.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
            out.extend_from_slice(data);
            out.extend_from_slice(b"\r\n");
        }

        out.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());
        out
    }

    fn settings(dir: &std::path::Path) -> DownloadSettings<'static> {
        DownloadSettings {
            output_directory: dir.to_owned(),
            chunk_cap: 4096,
            timeout: Some(Duration::from_secs(5)),
            on_header: None,
            on_body: None,
        }
    }

    #[tokio::test]
    async fn downloads_single_file() {
        let dir = tempfile::tempdir().unwrap();
        let raw = body(&[("a.txt", b"hello world")], "XBOUNDARY");
        let mut stream = Cursor::new(raw);

        let receiver = MultipartReceiver::new(&mut stream, settings(dir.path()));
        let paths = receiver
            .download("multipart/form-data; boundary=XBOUNDARY")
            .await
            .unwrap();

        assert_eq!(paths.len(), 1);
        assert_eq!(tokio::fs::read(&paths[0]).await.unwrap(), b"hello world");
    }

    #[tokio::test]
    async fn downloads_multiple_files() {
        let dir = tempfile::tempdir().unwrap();
        let raw = body(
            &[("a.txt", b"first file"), ("b.txt", b"second file")],
            "XBOUNDARY",
        );
        let mut stream = Cursor::new(raw);

        let receiver = MultipartReceiver::new(&mut stream, settings(dir.path()));
        let paths = receiver
            .download("multipart/form-data; boundary=XBOUNDARY")
            .await
            .unwrap();

        assert_eq!(paths.len(), 2);
        assert_eq!(tokio::fs::read(&paths[0]).await.unwrap(), b"first file");
        assert_eq!(tokio::fs::read(&paths[1]).await.unwrap(), b"second file");
    }

    #[tokio::test]
    async fn avoids_filename_collision() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"existing").unwrap();

        let raw = body(&[("a.txt", b"new content")], "XBOUNDARY");
        let mut stream = Cursor::new(raw);

        let receiver = MultipartReceiver::new(&mut stream, settings(dir.path()));
        let paths = receiver
            .download("multipart/form-data; boundary=XBOUNDARY")
            .await
            .unwrap();

        assert_eq!(paths[0], dir.path().join("a(1).txt"));
    }

    #[tokio::test]
    async fn writes_a_file_larger_than_chunk_cap() {
        let dir = tempfile::tempdir().unwrap();
        let data = vec![b'z'; 4096 * 3 + 17];
        let raw = body(&[("big.bin", &data)], "XBOUNDARY");
        let mut stream = Cursor::new(raw);

        let receiver = MultipartReceiver::new(&mut stream, settings(dir.path()));
        let paths = receiver
            .download("multipart/form-data; boundary=XBOUNDARY")
            .await
            .unwrap();

        assert_eq!(tokio::fs::read(&paths[0]).await.unwrap(), data);
    }

    #[tokio::test]
    async fn rejects_non_multipart_content_type() {
        let mut stream = Cursor::new(Vec::<u8>::new());
        let dir = tempfile::tempdir().unwrap();

        let receiver = MultipartReceiver::new(&mut stream, settings(dir.path()));
        let err = receiver
            .download("application/json")
            .await
            .unwrap_err();

        assert!(matches!(err.error, ReceiverError::NotMultipartFormData));
        assert!(err.paths.is_empty());
    }

    #[tokio::test]
    async fn rejects_missing_filename() {
        let dir = tempfile::tempdir().unwrap();
        let mut raw = Vec::new();
        raw.extend_from_slice(b"--XBOUNDARY\r\n");
        raw.extend_from_slice(b"Content-Disposition: form-data; name=\"file\"\r\n\r\n");
        raw.extend_from_slice(b"no filename here\r\n");
        raw.extend_from_slice(b"--XBOUNDARY--\r\n");

        let mut stream = Cursor::new(raw);
        let receiver = MultipartReceiver::new(&mut stream, settings(dir.path()));

        let err = receiver
            .download("multipart/form-data; boundary=XBOUNDARY")
            .await
            .unwrap_err();

        assert!(matches!(err.error, ReceiverError::InvalidStructure));
        assert!(err.paths.is_empty());
    }

    #[tokio::test]
    async fn cleans_up_partial_file_on_abrupt_close() {
        let dir = tempfile::tempdir().unwrap();
        let mut raw = Vec::new();
        raw.extend_from_slice(b"--XBOUNDARY\r\n");
        raw.extend_from_slice(
            b"Content-Disposition: form-data; name=\"file\"; filename=\"partial.bin\"\r\n\r\n",
        );
        raw.extend_from_slice(b"not enough data and then the stream just ends");

        let mut stream = Cursor::new(raw);
        let receiver = MultipartReceiver::new(&mut stream, settings(dir.path()));

        let err = receiver
            .download("multipart/form-data; boundary=XBOUNDARY")
            .await
            .unwrap_err();

        assert!(matches!(err.error, ReceiverError::Closed));
        assert!(err.paths.is_empty());
        assert!(!dir.path().join("partial.bin").exists());
    }

    #[tokio::test]
    async fn header_fault_after_completed_part_preserves_it() {
        let dir = tempfile::tempdir().unwrap();
        let mut raw = Vec::new();
        raw.extend_from_slice(b"--XBOUNDARY\r\n");
        raw.extend_from_slice(
            b"Content-Disposition: form-data; name=\"f\"; filename=\"a.txt\"\r\n\r\n",
        );
        raw.extend_from_slice(b"hello");
        raw.extend_from_slice(b"\r\n--XBOUNDARY\r\n");
        raw.extend_from_slice(b"Content-Disposition: form-data; name=\"f\"\r\n\r\n");
        raw.extend_from_slice(b"no filename on this part\r\n--XBOUNDARY--\r\n");

        let mut stream = Cursor::new(raw);
        let receiver = MultipartReceiver::new(&mut stream, settings(dir.path()));

        let err = receiver
            .download("multipart/form-data; boundary=XBOUNDARY")
            .await
            .unwrap_err();

        assert!(matches!(err.error, ReceiverError::InvalidStructure));

        // the first part completed before the second part's header fault --
        // it must still be on disk and still be reported in the surviving paths
        assert_eq!(err.paths, vec![dir.path().join("a.txt")]);
        assert_eq!(tokio::fs::read(&err.paths[0]).await.unwrap(), b"hello");

        let mut entries = tokio::fs::read_dir(dir.path()).await.unwrap();
        let mut count = 0;
        while entries.next_entry().await.unwrap().is_some() {
            count += 1;
        }
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn on_header_override_skips_collision_check() {
        let dir = tempfile::tempdir().unwrap();
        let override_path = dir.path().join("renamed.bin");
        let raw = body(&[("ignored.bin", b"payload")], "XBOUNDARY");
        let mut stream = Cursor::new(raw);

        let mut target = Some(override_path.clone());
        let mut s = settings(dir.path());
        s.on_header = Some(Box::new(move |_name| Ok(target.take())));

        let receiver = MultipartReceiver::new(&mut stream, s);
        let paths = receiver
            .download("multipart/form-data; boundary=XBOUNDARY")
            .await
            .unwrap();

        assert_eq!(paths[0], override_path);
        assert_eq!(tokio::fs::read(&override_path).await.unwrap(), b"payload");
    }

    #[tokio::test]
    async fn on_body_failure_aborts_and_unwinds_result_paths() {
        let dir = tempfile::tempdir().unwrap();
        let raw = body(&[("a.txt", b"hello")], "XBOUNDARY");
        let mut stream = Cursor::new(raw);

        let mut s = settings(dir.path());
        s.on_body = Some(Box::new(|_path| Err(anyhow::anyhow!("caller rejected file"))));

        let receiver = MultipartReceiver::new(&mut stream, s);
        let err = receiver
            .download("multipart/form-data; boundary=XBOUNDARY")
            .await
            .unwrap_err();

        assert!(matches!(err.error, ReceiverError::OperationAborted));
        assert!(err.paths.is_empty());
        assert!(!dir.path().join("a.txt").exists());
    }

    #[tokio::test]
    async fn filename_with_embedded_quote_is_preserved() {
        let dir = tempfile::tempdir().unwrap();
        let mut raw = Vec::new();
        raw.extend_from_slice(b"--XBOUNDARY\r\n");
        raw.extend_from_slice(
            b"Content-Disposition: form-data; name=\"f\"; filename=\"weird\"name.txt\"\r\n\r\n",
        );
        raw.extend_from_slice(b"payload");
        raw.extend_from_slice(b"\r\n--XBOUNDARY--\r\n");

        let mut stream = Cursor::new(raw);
        let receiver = MultipartReceiver::new(&mut stream, settings(dir.path()));
        let paths = receiver
            .download("multipart/form-data; boundary=XBOUNDARY")
            .await
            .unwrap();

        assert_eq!(paths[0], dir.path().join("weird\"name.txt"));
    }

    #[tokio::test]
    async fn rejects_path_traversal_in_filename() {
        let dir = tempfile::tempdir().unwrap();
        let raw = body(&[("../../etc/passwd", b"pwned")], "XBOUNDARY");
        let mut stream = Cursor::new(raw);

        let receiver = MultipartReceiver::new(&mut stream, settings(dir.path()));
        let err = receiver
            .download("multipart/form-data; boundary=XBOUNDARY")
            .await
            .unwrap_err();

        assert!(matches!(err.error, ReceiverError::InvalidFilePath));
        assert!(err.paths.is_empty());
        assert!(!dir.path().parent().unwrap().join("etc/passwd").exists());
    }

    #[tokio::test]
    async fn chunk_cap_equal_to_boundary_len_fails_fast() {
        let dir = tempfile::tempdir().unwrap();
        let raw = body(&[("a.txt", b"hello")], "XBOUNDARY");
        let mut stream = Cursor::new(raw);

        let mut s = settings(dir.path());
        s.chunk_cap = "XBOUNDARY".len();

        let receiver = MultipartReceiver::new(&mut stream, s);
        let err = receiver
            .download("multipart/form-data; boundary=XBOUNDARY")
            .await
            .unwrap_err();

        assert!(matches!(err.error, ReceiverError::InvalidStructure));
        assert!(err.paths.is_empty());
    }

    #[tokio::test]
    async fn read_timeout_mid_body_unlinks_in_flight_file() {
        use tokio::io::AsyncRead;
        use std::pin::Pin;
        use std::task::{Context, Poll};

        // yields one chunk of real data, then pends forever -- simulates a
        // stalled peer so the configured deadline is what ends the read
        struct StallsAfterFirstRead {
            first_chunk: Option<Vec<u8>>,
        }

        impl AsyncRead for StallsAfterFirstRead {
            fn poll_read(
                mut self: Pin<&mut Self>,
                _cx: &mut Context<'_>,
                buf: &mut tokio::io::ReadBuf<'_>,
            ) -> Poll<std::io::Result<()>> {
                match self.first_chunk.take() {
                    Some(chunk) => {
                        buf.put_slice(&chunk);
                        Poll::Ready(Ok(()))
                    }
                    None => Poll::Pending,
                }
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let mut header = Vec::new();
        header.extend_from_slice(b"--XBOUNDARY\r\n");
        header.extend_from_slice(
            b"Content-Disposition: form-data; name=\"f\"; filename=\"stalled.bin\"\r\n\r\n",
        );
        header.extend_from_slice(b"partial-data-then-stall");

        let mut stream = StallsAfterFirstRead {
            first_chunk: Some(header),
        };

        let mut s = settings(dir.path());
        s.timeout = Some(Duration::from_millis(20));

        let receiver = MultipartReceiver::new(&mut stream, s);
        let err = receiver
            .download("multipart/form-data; boundary=XBOUNDARY")
            .await
            .unwrap_err();

        assert!(matches!(err.error, ReceiverError::TimedOut));
        assert!(err.paths.is_empty());
        assert!(!dir.path().join("stalled.bin").exists());
    }
}
