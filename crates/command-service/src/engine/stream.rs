use std::io;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt};

const TRUNCATION_MARKER: &str = "\n[output truncated]";

/// Combined stdout/stderr of one child, in the order chunks arrive.
#[derive(Debug)]
pub(super) struct Capture {
    bytes: Vec<u8>,
    truncated: bool,
    max_bytes: usize,
}

pub(super) type SharedCapture = Arc<Mutex<Capture>>;

impl Capture {
    pub(super) fn shared(max_bytes: usize) -> SharedCapture {
        Arc::new(Mutex::new(Self {
            bytes: Vec::new(),
            truncated: false,
            max_bytes,
        }))
    }

    fn push(&mut self, chunk: &[u8]) {
        if self.bytes.len() < self.max_bytes {
            let remaining = self.max_bytes - self.bytes.len();
            let to_copy = remaining.min(chunk.len());
            self.bytes.extend_from_slice(&chunk[..to_copy]);
            if to_copy < chunk.len() {
                self.truncated = true;
            }
        } else if !chunk.is_empty() {
            self.truncated = true;
        }
    }

    pub(super) fn render(&self) -> String {
        if !self.truncated {
            return String::from_utf8_lossy(&self.bytes).into_owned();
        }
        let kept = complete_prefix_len(&self.bytes);
        let mut out = String::from_utf8_lossy(&self.bytes[..kept]).into_owned();
        out.push_str(TRUNCATION_MARKER);
        out
    }
}

/// Length of `bytes` without a UTF-8 sequence the cap cut short.
fn complete_prefix_len(bytes: &[u8]) -> usize {
    let len = bytes.len();
    for back in 1..=len.min(4) {
        let byte = bytes[len - back];
        if byte & 0xC0 == 0x80 {
            continue;
        }
        let width = match byte {
            0xC0..=0xDF => 2,
            0xE0..=0xEF => 3,
            0xF0..=0xF7 => 4,
            _ => 1,
        };
        return if width > back { len - back } else { len };
    }
    len
}

pub(super) async fn read_stream_capture<R: AsyncRead + Unpin>(
    mut reader: R,
    capture: SharedCapture,
) -> io::Result<()> {
    let mut chunk = [0u8; 4096];
    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        capture.lock().push(&chunk[..n]);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn captures_everything_under_the_cap() {
        let capture = Capture::shared(64);
        read_stream_capture(&b"hello\n"[..], Arc::clone(&capture))
            .await
            .expect("read");
        assert_eq!(capture.lock().render(), "hello\n");
    }

    #[tokio::test]
    async fn marks_truncation_past_the_cap() {
        let capture = Capture::shared(4);
        read_stream_capture(&b"abcdefgh"[..], Arc::clone(&capture))
            .await
            .expect("read");
        assert_eq!(capture.lock().render(), "abcd\n[output truncated]");
    }

    #[tokio::test]
    async fn truncation_never_splits_a_character() {
        let capture = Capture::shared(2);
        read_stream_capture("aé".as_bytes(), Arc::clone(&capture))
            .await
            .expect("read");
        read_stream_capture("!".as_bytes(), Arc::clone(&capture))
            .await
            .expect("read");
        assert_eq!(capture.lock().render(), "a\n[output truncated]");

        let capture = Capture::shared(5);
        read_stream_capture("ab€€".as_bytes(), Arc::clone(&capture))
            .await
            .expect("read");
        let rendered = capture.lock().render();
        assert_eq!(rendered, "ab€\n[output truncated]");
        assert!(!rendered.contains('\u{FFFD}'));
    }

    #[tokio::test]
    async fn two_streams_share_one_buffer() {
        let capture = Capture::shared(64);
        read_stream_capture(&b"out\n"[..], Arc::clone(&capture))
            .await
            .expect("stdout");
        read_stream_capture(&b"err\n"[..], Arc::clone(&capture))
            .await
            .expect("stderr");
        assert_eq!(capture.lock().render(), "out\nerr\n");
    }
}
