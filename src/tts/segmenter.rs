//! Deciding what part of a growing response can be spoken.
//!
//! Two levels of splitting:
//!
//! 1. While the response is still streaming, only text up to the *last*
//!    sentence boundary (terminator run followed by whitespace) is released.
//!    Anything after it may be a half-written sentence.
//! 2. Released text longer than the backend's utterance limit is packed
//!    sentence by sentence into chunks that fit.
//!
//! [`Segmenter::next`] is pure; the caller threads a [`SpeechCursor`]
//! through successive calls.

use crate::config::TtsConfig;

/// Default longest utterance, in characters.
pub const DEFAULT_MAX_CHUNK_CHARS: usize = 160;

/// Default sentence terminators.
pub const DEFAULT_TERMINATORS: &[char] = &['.', '!', '?'];

/// A bounded piece of text to be spoken once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeechChunk {
    /// Monotonic sequence number, for ordering checks and logs.
    pub seq: u64,
    /// Trimmed, non-empty text of at most the configured length.
    pub text: String,
}

/// Position of the segmenter within the response text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SpeechCursor {
    /// Byte length of the text already turned into chunks.
    pub offset: usize,
    /// Sequence number for the next chunk.
    pub next_seq: u64,
}

impl SpeechCursor {
    /// Cursor at the start of a new text, keeping sequence numbering.
    pub fn rewound(self) -> Self {
        Self {
            offset: 0,
            next_seq: self.next_seq,
        }
    }
}

/// Splits response text into speakable chunks.
#[derive(Debug, Clone)]
pub struct Segmenter {
    max_chars: usize,
    terminators: Vec<char>,
}

impl Default for Segmenter {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CHUNK_CHARS, DEFAULT_TERMINATORS)
    }
}

impl Segmenter {
    /// Create a segmenter. A `max_chars` of zero is treated as one.
    pub fn new(max_chars: usize, terminators: &[char]) -> Self {
        Self {
            max_chars: max_chars.max(1),
            terminators: terminators.to_vec(),
        }
    }

    /// Create a segmenter from speech settings. An empty terminator set
    /// falls back to the defaults.
    pub fn from_config(config: &TtsConfig) -> Self {
        let terminators: Vec<char> = config.terminators.chars().collect();
        if terminators.is_empty() {
            Self::new(config.max_chunk_chars, DEFAULT_TERMINATORS)
        } else {
            Self::new(config.max_chunk_chars, &terminators)
        }
    }

    /// Longest chunk this segmenter produces, in characters.
    pub fn max_chars(&self) -> usize {
        self.max_chars
    }

    fn is_terminator(&self, c: char) -> bool {
        self.terminators.contains(&c)
    }

    /// Compute the chunks that became speakable since `cursor`.
    ///
    /// If `full_text` is shorter than the cursor offset (or the offset no
    /// longer lands on a character boundary) the text was replaced, and
    /// segmentation restarts from the beginning.
    pub fn next(
        &self,
        full_text: &str,
        cursor: SpeechCursor,
        stream_complete: bool,
    ) -> (Vec<SpeechChunk>, SpeechCursor) {
        let mut cursor = cursor;
        if full_text.len() < cursor.offset || !full_text.is_char_boundary(cursor.offset) {
            cursor = cursor.rewound();
        }

        let suffix = &full_text[cursor.offset..];
        if suffix.trim().is_empty() {
            return (Vec::new(), cursor);
        }

        let span_len = if stream_complete {
            suffix.len()
        } else {
            match self.last_boundary(suffix) {
                Some(end) => end,
                None => return (Vec::new(), cursor),
            }
        };

        let chunks = self.number(self.split(&suffix[..span_len]), &mut cursor);
        cursor.offset += span_len;
        (chunks, cursor)
    }

    /// Split a whole text into numbered chunks, ignoring sentence safety.
    pub fn chunk_all(&self, text: &str, cursor: &mut SpeechCursor) -> Vec<SpeechChunk> {
        self.number(self.split(text), cursor)
    }

    fn number(&self, texts: Vec<String>, cursor: &mut SpeechCursor) -> Vec<SpeechChunk> {
        texts
            .into_iter()
            .map(|text| {
                let seq = cursor.next_seq;
                cursor.next_seq += 1;
                SpeechChunk { seq, text }
            })
            .collect()
    }

    /// Byte offset just past the last terminator-plus-whitespace run in `text`.
    pub fn last_boundary(&self, text: &str) -> Option<usize> {
        let mut last = None;
        let mut chars = text.char_indices().peekable();
        while let Some((i, c)) = chars.next() {
            if !self.is_terminator(c) {
                continue;
            }
            let mut end = i + c.len_utf8();
            let mut saw_space = false;
            while let Some(&(j, next)) = chars.peek() {
                if !next.is_whitespace() {
                    break;
                }
                saw_space = true;
                end = j + next.len_utf8();
                chars.next();
            }
            if saw_space {
                last = Some(end);
            }
        }
        last
    }

    /// Split `text` into trimmed chunks of at most `max_chars` characters,
    /// packing whole sentences greedily.
    pub fn split(&self, text: &str) -> Vec<String> {
        let text = text.trim();
        if text.is_empty() {
            return Vec::new();
        }
        if char_len(text) <= self.max_chars {
            return vec![text.to_owned()];
        }

        let mut chunks = Vec::new();
        let mut current = String::new();
        let mut current_len = 0;
        for sentence in self.sentences(text) {
            for piece in self.fit(sentence) {
                let piece_len = char_len(piece);
                if current_len + piece_len > self.max_chars {
                    push_trimmed(&mut chunks, &current);
                    current.clear();
                    current_len = 0;
                }
                current.push_str(piece);
                current_len += piece_len;
            }
        }
        push_trimmed(&mut chunks, &current);
        chunks
    }

    /// Sentences of `text`: runs ending after a terminator run, plus any
    /// unterminated remainder. Whitespace after a terminator starts the next
    /// sentence.
    fn sentences<'a>(&self, text: &'a str) -> Vec<&'a str> {
        let mut out = Vec::new();
        let mut start = 0;
        let mut chars = text.char_indices().peekable();
        while let Some((i, c)) = chars.next() {
            if !self.is_terminator(c) {
                continue;
            }
            let end_of_run = match chars.peek() {
                Some(&(_, next)) => !self.is_terminator(next),
                None => true,
            };
            if end_of_run {
                let end = i + c.len_utf8();
                out.push(&text[start..end]);
                start = end;
            }
        }
        if start < text.len() {
            out.push(&text[start..]);
        }
        out
    }

    /// Break a single over-long sentence at word boundaries, or hard at the
    /// limit when a word alone is too long.
    fn fit<'a>(&self, sentence: &'a str) -> Vec<&'a str> {
        let mut out = Vec::new();
        let mut rest = sentence;
        while char_len(rest) > self.max_chars {
            let limit = rest
                .char_indices()
                .nth(self.max_chars)
                .map_or(rest.len(), |(i, _)| i);
            let cut = match rest[..limit].rfind(char::is_whitespace) {
                Some(ws) if ws > 0 => ws,
                _ => limit,
            };
            out.push(&rest[..cut]);
            rest = &rest[cut..];
        }
        if !rest.is_empty() {
            out.push(rest);
        }
        out
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

fn push_trimmed(chunks: &mut Vec<String>, text: &str) {
    let trimmed = text.trim();
    if !trimmed.is_empty() {
        chunks.push(trimmed.to_owned());
    }
}
