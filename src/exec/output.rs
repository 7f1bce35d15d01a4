/// Bounded capture of the child's stdout/stderr
///
/// Each stream is read on its own thread. Bytes past the per-stream limit
/// are drained and discarded so the child never blocks on a full pipe.
use std::io::{ErrorKind, Read};
use std::thread;

/// Appended to a stream that hit its limit
pub const TRUNCATION_MARKER: &str = "[output truncated]";

/// Integrity of a captured stream
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputIntegrity {
    Complete,
    TruncatedByLimit,
    ReadError,
}

#[derive(Clone, Debug)]
pub struct CapturedStream {
    pub bytes: Vec<u8>,
    /// Bytes the child wrote, kept or not
    pub total_bytes: u64,
    pub integrity: OutputIntegrity,
}

impl CapturedStream {
    pub fn empty() -> Self {
        Self {
            bytes: Vec::new(),
            total_bytes: 0,
            integrity: OutputIntegrity::Complete,
        }
    }

    pub fn is_truncated(&self) -> bool {
        self.integrity == OutputIntegrity::TruncatedByLimit
    }

    /// Decode as UTF-8, marking truncation
    pub fn into_text(self) -> String {
        let truncated = self.is_truncated();
        let mut bytes = self.bytes;
        if truncated {
            // The cut may have split a multi-byte character
            if let Err(err) = std::str::from_utf8(&bytes) {
                if err.error_len().is_none() {
                    bytes.truncate(err.valid_up_to());
                }
            }
        }
        let mut text = String::from_utf8_lossy(&bytes).into_owned();
        if truncated {
            if !text.is_empty() && !text.ends_with('\n') {
                text.push('\n');
            }
            text.push_str(TRUNCATION_MARKER);
        }
        text
    }
}

/// Read `stream` to EOF keeping at most `limit` bytes
pub fn collect_stream<R: Read>(mut stream: R, limit: usize) -> CapturedStream {
    let mut captured = CapturedStream::empty();
    let mut buf = [0u8; 8192];

    loop {
        match stream.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                captured.total_bytes += n as u64;
                let remaining = limit.saturating_sub(captured.bytes.len());
                if n > remaining {
                    captured.bytes.extend_from_slice(&buf[..remaining]);
                    captured.integrity = OutputIntegrity::TruncatedByLimit;
                } else {
                    captured.bytes.extend_from_slice(&buf[..n]);
                }
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                log::warn!("output stream read failed: {}", e);
                if captured.integrity == OutputIntegrity::Complete {
                    captured.integrity = OutputIntegrity::ReadError;
                }
                break;
            }
        }
    }

    captured
}

/// Collect `stream` on a background thread
pub fn spawn_collector<R: Read + Send + 'static>(
    stream: R,
    limit: usize,
) -> thread::JoinHandle<CapturedStream> {
    thread::spawn(move || collect_stream(stream, limit))
}

/// Join a collector, treating a panicked thread as an empty stream
pub fn join_collector(handle: Option<thread::JoinHandle<CapturedStream>>) -> CapturedStream {
    match handle {
        Some(handle) => handle.join().unwrap_or_else(|_| CapturedStream {
            integrity: OutputIntegrity::ReadError,
            ..CapturedStream::empty()
        }),
        None => CapturedStream::empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_stream_is_complete() {
        let captured = collect_stream(&b"hello\n"[..], 64);
        assert_eq!(captured.integrity, OutputIntegrity::Complete);
        assert_eq!(captured.total_bytes, 6);
        assert_eq!(captured.into_text(), "hello\n");
    }

    #[test]
    fn test_excess_is_drained_and_marked() {
        let data = vec![b'x'; 100_000];
        let captured = collect_stream(data.as_slice(), 10);
        assert!(captured.is_truncated());
        assert_eq!(captured.total_bytes, 100_000);
        assert_eq!(captured.bytes.len(), 10);
        assert_eq!(captured.into_text(), format!("xxxxxxxxxx\n{}", TRUNCATION_MARKER));
    }

    #[test]
    fn test_exact_limit_is_not_truncated() {
        let captured = collect_stream(&b"abcd"[..], 4);
        assert_eq!(captured.integrity, OutputIntegrity::Complete);
        assert_eq!(captured.into_text(), "abcd");
    }

    #[test]
    fn test_split_character_is_dropped() {
        // "é" is two bytes; the limit cuts it in half
        let captured = collect_stream("aé".as_bytes(), 2);
        assert_eq!(captured.into_text(), format!("a\n{}", TRUNCATION_MARKER));
    }

    #[test]
    fn test_collector_thread() {
        let handle = spawn_collector(std::io::Cursor::new(b"line\n".to_vec()), 1024);
        assert_eq!(join_collector(Some(handle)).into_text(), "line\n");
        assert_eq!(join_collector(None).into_text(), "");
    }
}
