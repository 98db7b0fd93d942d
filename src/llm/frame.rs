//! Line framing for streamed response bodies.
//!
//! Network reads end wherever the transport felt like ending them, which is
//! frequently in the middle of a line (and occasionally in the middle of a
//! multi-byte UTF-8 sequence). [`FrameReader`] buffers raw bytes and only
//! hands out complete lines.
//!
//! # Examples
//!
//! ```
//! use voxstream::llm::frame::FrameReader;
//!
//! let mut reader = FrameReader::new();
//! assert!(reader.feed(b"data: {\"choic").is_empty());
//! let frames = reader.feed(b"es\":[]}\ndata: [DO");
//! assert_eq!(frames, vec!["data: {\"choices\":[]}".to_string()]);
//! assert_eq!(reader.flush().as_deref(), Some("data: [DO"));
//! ```

/// Splits a byte stream into newline-terminated frames.
///
/// The terminator is `\n`; a `\r` immediately before it is also dropped so
/// CRLF bodies produce the same frames as LF bodies.
#[derive(Debug, Default)]
pub struct FrameReader {
    carry: Vec<u8>,
    /// Prefix of `carry` already known to contain no `\n`.
    scanned: usize,
}

impl FrameReader {
    /// Create an empty reader.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `chunk` and return every line it completed, in order.
    ///
    /// The trailing incomplete line (if any) is retained for the next call.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        self.carry.extend_from_slice(chunk);

        let mut frames = Vec::new();
        let mut start = 0;
        let mut from = self.scanned;
        while let Some(rel) = self.carry[from..].iter().position(|&b| b == b'\n') {
            let end = from + rel;
            frames.push(decode_line(&self.carry[start..end]));
            start = end + 1;
            from = start;
        }
        self.carry.drain(..start);
        self.scanned = self.carry.len();
        frames
    }

    /// Take whatever is left in the buffer as one final frame.
    ///
    /// Call this once the body has ended; a server that closes right after
    /// its last `data:` line without a newline still gets that line parsed.
    pub fn flush(&mut self) -> Option<String> {
        if self.carry.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.carry);
        self.scanned = 0;
        Some(decode_line(&rest))
    }

    /// Number of buffered bytes not yet part of a complete frame.
    pub fn pending(&self) -> usize {
        self.carry.len()
    }
}

fn decode_line(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    const BODY: &str = "data: {\"id\":\"r1\",\"choices\":[{\"delta\":{\"content\":\"Héllo\"}}]}\n\
                        \n\
                        : keep-alive\n\
                        data: {\"choices\":[{\"delta\":{\"content\":\" wörld…\"}}]}\n\
                        data: [DONE]\n";

    fn collect_all(reader: &mut FrameReader, chunks: &[&[u8]]) -> Vec<String> {
        let mut frames = Vec::new();
        for chunk in chunks {
            frames.extend(reader.feed(chunk));
        }
        frames.extend(reader.flush());
        frames
    }

    #[test]
    fn single_chunk_splits_lines() {
        let mut reader = FrameReader::new();
        let frames = reader.feed(b"a\nb\n");
        assert_eq!(frames, vec!["a", "b"]);
        assert_eq!(reader.pending(), 0);
        assert!(reader.flush().is_none());
    }

    #[test]
    fn incomplete_tail_is_retained() {
        let mut reader = FrameReader::new();
        assert!(reader.feed(b"data: {\"choic").is_empty());
        let frames = reader.feed(b"es\":[{\"delta\":{\"content\":\"X\"}}]}\n");
        assert_eq!(frames, vec!["data: {\"choices\":[{\"delta\":{\"content\":\"X\"}}]}"]);
    }

    #[test]
    fn flush_returns_unterminated_last_line() {
        let mut reader = FrameReader::new();
        assert_eq!(reader.feed(b"data: one\ndata: two"), vec!["data: one"]);
        assert_eq!(reader.flush().as_deref(), Some("data: two"));
        assert!(reader.flush().is_none());
    }

    #[test]
    fn crlf_terminators_are_stripped() {
        let mut reader = FrameReader::new();
        let frames = reader.feed(b"data: a\r\n\r\ndata: b\r\n");
        assert_eq!(frames, vec!["data: a", "", "data: b"]);
    }

    #[test]
    fn crlf_split_between_reads() {
        let mut reader = FrameReader::new();
        assert!(reader.feed(b"data: a\r").is_empty());
        assert_eq!(reader.feed(b"\n"), vec!["data: a"]);
    }

    #[test]
    fn terminator_at_chunk_edge() {
        let mut reader = FrameReader::new();
        assert_eq!(reader.feed(b"first\n"), vec!["first"]);
        assert_eq!(reader.feed(b"\nsecond"), vec![""]);
        assert_eq!(reader.flush().as_deref(), Some("second"));
    }

    #[test]
    fn long_line_is_scanned_once() {
        let mut reader = FrameReader::new();
        let piece = [b'x'; 64];
        for i in 1..=1000 {
            assert!(reader.feed(&piece).is_empty());
            assert_eq!(reader.scanned, i * piece.len());
            assert_eq!(reader.scanned, reader.pending());
        }

        let frames = reader.feed(b"x\ny");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].len(), 64_001);
        assert!(frames[0].bytes().all(|b| b == b'x'));
        assert_eq!(reader.scanned, 1);
        assert_eq!(reader.flush().as_deref(), Some("y"));
        assert_eq!(reader.scanned, 0);
        assert_eq!(reader.feed(b"z\n"), vec!["z"]);
    }

    #[test]
    fn multibyte_char_split_across_reads() {
        let text = "data: é\n".as_bytes();
        // 'é' is two bytes; cut between them.
        let cut = "data: ".len() + 1;
        let mut reader = FrameReader::new();
        assert!(reader.feed(&text[..cut]).is_empty());
        assert_eq!(reader.feed(&text[cut..]), vec!["data: é"]);
    }

    #[test]
    fn every_split_point_yields_same_frames() {
        let bytes = BODY.as_bytes();
        let whole = collect_all(&mut FrameReader::new(), &[bytes]);

        for cut in 0..=bytes.len() {
            let (a, b) = bytes.split_at(cut);
            let frames = collect_all(&mut FrameReader::new(), &[a, b]);
            assert_eq!(frames, whole, "split at byte {cut}");
        }
    }

    #[test]
    fn byte_at_a_time_yields_same_frames() {
        let bytes = BODY.as_bytes();
        let whole = collect_all(&mut FrameReader::new(), &[bytes]);
        let singles: Vec<&[u8]> = bytes.chunks(1).collect();
        assert_eq!(collect_all(&mut FrameReader::new(), &singles), whole);
    }

    #[test]
    fn frames_concatenate_back_to_input() {
        let bytes = BODY.as_bytes();
        let chunks: Vec<&[u8]> = bytes.chunks(7).collect();
        let frames = collect_all(&mut FrameReader::new(), &chunks);
        let rejoined: String = frames.concat();
        assert_eq!(rejoined, BODY.replace('\n', ""));
    }
}
