//! Frame buffer for accumulating partial reads.
//!
//! Uses `bytes::BytesMut` for buffer management. Frames are not
//! length-prefixed: each envelope is bracketed by a head and a tail
//! delimiter, and chunks may split a delimiter anywhere, so the buffer is
//! rescanned after every push.
//!
//! Extraction rule: when the tail delimiter appears, the payload is the
//! bytes after the most recent head delimiter preceding it; everything up to
//! and including the tail is then dropped. A tail with no preceding head
//! takes the payload from the start of the buffer, so any pre-head noise is
//! discarded with it (a later parse failure surfaces as a decode error).

use bytes::{Bytes, BytesMut};
use memchr::memmem;

use super::delimiter::Delimiters;

/// Buffer for accumulating pipe bytes and extracting delimited payloads.
///
/// One instance runs per pipe: the stdout instance produces envelope
/// payloads, the stderr instance exists so its pipe is consumed and never
/// blocks the child.
pub struct FrameBuffer {
    /// Accumulated bytes from pipe reads.
    buffer: BytesMut,
    head: Vec<u8>,
    tail: Vec<u8>,
}

impl FrameBuffer {
    /// Create a frame buffer scanning for the given delimiter pair.
    pub fn new(delimiters: &Delimiters) -> Self {
        Self {
            buffer: BytesMut::with_capacity(64 * 1024),
            head: delimiters.head().as_bytes().to_vec(),
            tail: delimiters.tail().as_bytes().to_vec(),
        }
    }

    /// Push data into the buffer and extract all complete payloads.
    ///
    /// Returns a vector of payloads (may be empty if no tail has arrived
    /// yet). Fragmented delimiters are handled by buffering: a delimiter
    /// split across two pushes is found once its last byte arrives.
    pub fn push(&mut self, data: &[u8]) -> Vec<Bytes> {
        self.buffer.extend_from_slice(data);

        let mut payloads = Vec::new();
        while let Some(payload) = self.try_extract_one() {
            payloads.push(payload);
        }
        payloads
    }

    /// Try to extract a single payload from the buffer.
    ///
    /// Returns `None` when the buffer holds no complete frame.
    fn try_extract_one(&mut self) -> Option<Bytes> {
        let tail_at = memmem::find(&self.buffer, &self.tail)?;

        // Most recent head strictly before the tail; a missing head means
        // the payload starts at the buffer start.
        let start = match memmem::rfind(&self.buffer[..tail_at], &self.head) {
            Some(head_at) => head_at + self.head.len(),
            None => {
                tracing::warn!(
                    discarded = tail_at,
                    "tail delimiter with no preceding head; taking payload from buffer start"
                );
                0
            }
        };

        let consumed = self.buffer.split_to(tail_at + self.tail.len()).freeze();
        Some(consumed.slice(start..tail_at))
    }

    /// Number of buffered bytes not yet part of a complete frame.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Clear the buffer.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEAD: &str = "aaaaabbbbb";
    const TAIL: &str = "cccccddddd";

    fn buffer() -> FrameBuffer {
        FrameBuffer::new(&Delimiters::fixed(HEAD, TAIL))
    }

    fn frame(payload: &str) -> Vec<u8> {
        format!("{HEAD}{payload}{TAIL}").into_bytes()
    }

    #[test]
    fn test_single_complete_frame() {
        let mut buf = buffer();
        let payloads = buf.push(&frame(r#"{"result":{}}"#));

        assert_eq!(payloads.len(), 1);
        assert_eq!(&payloads[0][..], br#"{"result":{}}"#);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_multiple_frames_in_one_push() {
        let mut buf = buffer();
        let mut data = frame("first");
        data.extend(frame("second"));
        data.extend(frame("third"));

        let payloads = buf.push(&data);

        assert_eq!(payloads.len(), 3);
        assert_eq!(&payloads[0][..], b"first");
        assert_eq!(&payloads[1][..], b"second");
        assert_eq!(&payloads[2][..], b"third");
        assert!(buf.is_empty());
    }

    #[test]
    fn test_delimiter_split_across_chunks() {
        let mut buf = buffer();
        let data = frame("payload");

        // Split in the middle of the head and of the tail.
        let payloads = buf.push(&data[..4]);
        assert!(payloads.is_empty());

        let payloads = buf.push(&data[4..data.len() - 3]);
        assert!(payloads.is_empty());

        let payloads = buf.push(&data[data.len() - 3..]);
        assert_eq!(payloads.len(), 1);
        assert_eq!(&payloads[0][..], b"payload");
    }

    #[test]
    fn test_byte_at_a_time() {
        let mut buf = buffer();
        let mut all = Vec::new();

        for byte in frame("hi") {
            all.extend(buf.push(&[byte]));
        }

        assert_eq!(all.len(), 1);
        assert_eq!(&all[0][..], b"hi");
    }

    #[test]
    fn test_tail_without_head_takes_buffer_start() {
        let mut buf = buffer();
        let payloads = buf.push(format!("noise-before{TAIL}").as_bytes());

        assert_eq!(payloads.len(), 1);
        assert_eq!(&payloads[0][..], b"noise-before");
        assert!(buf.is_empty());
    }

    #[test]
    fn test_pre_head_noise_is_discarded_with_payload() {
        let mut buf = buffer();
        let payloads = buf.push(format!("banner text{HEAD}payload{TAIL}").as_bytes());

        assert_eq!(payloads.len(), 1);
        assert_eq!(&payloads[0][..], b"payload");
        assert!(buf.is_empty());
    }

    #[test]
    fn test_most_recent_head_wins() {
        // A payload containing a stray head: the extraction anchors on the
        // latest head before the tail.
        let mut buf = buffer();
        let payloads = buf.push(format!("{HEAD}junk{HEAD}real{TAIL}").as_bytes());

        assert_eq!(payloads.len(), 1);
        assert_eq!(&payloads[0][..], b"real");
    }

    #[test]
    fn test_noise_between_frames() {
        let mut buf = buffer();
        let mut data = frame("one");
        data.extend_from_slice(b"inter-frame chatter");
        data.extend(frame("two"));

        let payloads = buf.push(&data);

        assert_eq!(payloads.len(), 2);
        assert_eq!(&payloads[0][..], b"one");
        assert_eq!(&payloads[1][..], b"two");
    }

    #[test]
    fn test_empty_payload() {
        let mut buf = buffer();
        let payloads = buf.push(&frame(""));

        assert_eq!(payloads.len(), 1);
        assert!(payloads[0].is_empty());
    }

    #[test]
    fn test_partial_frame_stays_buffered() {
        let mut buf = buffer();
        let payloads = buf.push(format!("{HEAD}unfinished").as_bytes());

        assert!(payloads.is_empty());
        assert_eq!(buf.len(), HEAD.len() + "unfinished".len());

        buf.clear();
        assert!(buf.is_empty());
    }
}
