//! Per-child framing delimiters and scratch-file naming.
//!
//! Each spawned interpreter gets its own pair of 10-byte ASCII delimiters and
//! an 8-byte random hex prefix for its two scratch files. Delimiters are
//! stable for the life of the child; a fresh child after a restart gets fresh
//! ones, so a stale envelope from a dead interpreter can never frame-match.

use std::sync::atomic::{AtomicU64, Ordering};

/// Delimiter length in bytes (fixed, exactly 10; two 5-byte halves).
pub const DELIMITER_LEN: usize = 10;

/// Head/tail delimiter pair bracketing each envelope on stdout.
///
/// The wrapper script only ever contains the two halves of each delimiter in
/// separate variables, reassembling them at emit time, so the script source
/// itself can never collide with the framing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delimiters {
    head: String,
    tail: String,
}

impl Delimiters {
    /// Generate a fresh delimiter pair.
    pub fn generate() -> Self {
        let head = delimiter_token();
        let mut tail = delimiter_token();
        while tail == head {
            tail = delimiter_token();
        }
        Self { head, tail }
    }

    /// Fixed delimiters, for tests that need deterministic framing.
    ///
    /// # Panics
    ///
    /// Panics if either string is not exactly [`DELIMITER_LEN`] ASCII bytes.
    pub fn fixed(head: &str, tail: &str) -> Self {
        assert_eq!(head.len(), DELIMITER_LEN);
        assert_eq!(tail.len(), DELIMITER_LEN);
        assert!(head.is_ascii() && tail.is_ascii());
        Self {
            head: head.to_string(),
            tail: tail.to_string(),
        }
    }

    /// The full head delimiter.
    pub fn head(&self) -> &str {
        &self.head
    }

    /// The full tail delimiter.
    pub fn tail(&self) -> &str {
        &self.tail
    }

    /// The head delimiter split into its two 5-byte halves.
    pub fn head_halves(&self) -> (&str, &str) {
        self.head.split_at(DELIMITER_LEN / 2)
    }

    /// The tail delimiter split into its two 5-byte halves.
    pub fn tail_halves(&self) -> (&str, &str) {
        self.tail.split_at(DELIMITER_LEN / 2)
    }
}

/// Scratch-file prefix for one child: 8 random bytes as 16 hex characters.
pub fn scratch_prefix() -> String {
    format!("{:016x}", rand_u64())
}

/// One 10-character ASCII delimiter token.
fn delimiter_token() -> String {
    // 16 hex chars from a u64; keep the low 10.
    let hex = format!("{:016x}", rand_u64());
    hex[hex.len() - DELIMITER_LEN..].to_string()
}

/// Simple random u64 using system time, process ID, and a call counter.
fn rand_u64() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};

    static COUNTER: AtomicU64 = AtomicU64::new(0);

    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);

    // Mix in process ID and a counter so two calls in the same nanosecond
    // still differ.
    let pid = std::process::id() as u64;
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    (nanos ^ n.wrapping_mul(0x9e37_79b9_7f4a_7c15))
        .wrapping_mul(0x517c_c1b7_2722_0a95)
        ^ pid
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delimiters_are_ten_ascii_bytes() {
        let d = Delimiters::generate();
        assert_eq!(d.head().len(), DELIMITER_LEN);
        assert_eq!(d.tail().len(), DELIMITER_LEN);
        assert!(d.head().is_ascii());
        assert!(d.tail().is_ascii());
    }

    #[test]
    fn test_head_and_tail_differ() {
        let d = Delimiters::generate();
        assert_ne!(d.head(), d.tail());
    }

    #[test]
    fn test_halves_reassemble() {
        let d = Delimiters::generate();
        let (h0, h1) = d.head_halves();
        assert_eq!(h0.len(), 5);
        assert_eq!(h1.len(), 5);
        assert_eq!(format!("{h0}{h1}"), d.head());
        let (t0, t1) = d.tail_halves();
        assert_eq!(format!("{t0}{t1}"), d.tail());
    }

    #[test]
    fn test_scratch_prefix_is_sixteen_hex_chars() {
        let p = scratch_prefix();
        assert_eq!(p.len(), 16);
        assert!(p.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_generations_get_distinct_delimiters() {
        let pairs: Vec<Delimiters> = (0..10).map(|_| Delimiters::generate()).collect();
        for (i, a) in pairs.iter().enumerate() {
            for (j, b) in pairs.iter().enumerate() {
                if i != j {
                    assert_ne!(a.head(), b.head());
                }
            }
        }
    }
}
