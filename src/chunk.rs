//! Structure-aware text chunker.
//!
//! Splits document text into [`TextChunk`]s bounded by `chunk_size`
//! characters, with `chunk_overlap` characters of shared context between
//! neighbours. Two modes are available:
//!
//! - **markdown**: the document is first cut into structural segments
//!   (paragraphs, headings glued to what follows them, fenced code blocks
//!   kept whole) and the segments are packed greedily into chunks.
//! - **plain**: a fixed window slides over the raw characters.
//!
//! Sizes are counted in Unicode scalar values, never bytes, so slicing is
//! always on char boundaries. Each chunk gets a fresh UUID and a SHA-256
//! hash of its content for staleness detection.

use chrono::Utc;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{ConfigError, InputError};
use crate::models::{ChunkMetadata, TextChunk};

/// How the chunker treats document structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ChunkMode {
    #[default]
    Markdown,
    Plain,
}

/// Chunking parameters, as read from the `[chunking]` table.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
    #[serde(default)]
    pub min_chunk_size: usize,
    #[serde(default)]
    pub mode: ChunkMode,
    #[serde(default = "default_true")]
    pub atomic_code_blocks: bool,
}

fn default_chunk_size() -> usize {
    1000
}
fn default_chunk_overlap() -> usize {
    200
}
fn default_true() -> bool {
    true
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            min_chunk_size: 0,
            mode: ChunkMode::Markdown,
            atomic_code_blocks: true,
        }
    }
}

impl ChunkingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == 0 {
            return Err(ConfigError::ZeroChunkSize);
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(ConfigError::OverlapTooLarge {
                overlap: self.chunk_overlap,
                size: self.chunk_size,
            });
        }
        if self.min_chunk_size > self.chunk_size {
            return Err(ConfigError::MinChunkTooLarge {
                min: self.min_chunk_size,
                size: self.chunk_size,
            });
        }
        Ok(())
    }
}

/// A validated, immutable chunker. Cheap to clone and safe to share.
#[derive(Debug, Clone)]
pub struct Chunker {
    config: ChunkingConfig,
}

/// Borrow `raw` as text, rejecting NUL bytes and invalid UTF-8.
pub fn decode_text(raw: &[u8]) -> Result<&str, InputError> {
    if let Some(pos) = raw.iter().position(|&b| b == 0) {
        return Err(InputError::Binary(pos));
    }
    std::str::from_utf8(raw).map_err(|e| InputError::NotUtf8(e.valid_up_to()))
}

impl Chunker {
    pub fn new(config: ChunkingConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &ChunkingConfig {
        &self.config
    }

    /// Chunk raw bytes, refusing anything that is not text.
    pub fn chunk_bytes(
        &self,
        raw: &[u8],
        metadata: &ChunkMetadata,
    ) -> Result<Vec<TextChunk>, InputError> {
        Ok(self.chunk(decode_text(raw)?, metadata))
    }

    /// Split `text` into chunks with contiguous indices starting at 0.
    ///
    /// Blank input yields no chunks. Input that fits in one chunk yields
    /// exactly one chunk holding the whole (trimmed) text.
    pub fn chunk(&self, text: &str, metadata: &ChunkMetadata) -> Vec<TextChunk> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Vec::new();
        }

        let pieces = if char_len(trimmed) <= self.config.chunk_size {
            vec![trimmed.to_string()]
        } else {
            match self.config.mode {
                ChunkMode::Plain => self.plain_windows(text),
                ChunkMode::Markdown => self.markdown_chunks(text),
            }
        };

        finalize(pieces, metadata)
    }

    fn plain_windows(&self, text: &str) -> Vec<String> {
        let size = self.config.chunk_size;
        let step = size - self.config.chunk_overlap;
        let offsets: Vec<usize> = text.char_indices().map(|(i, _)| i).collect();
        let len = offsets.len();
        let byte_at = |c: usize| if c >= len { text.len() } else { offsets[c] };

        let mut windows: Vec<(usize, usize)> = Vec::new();
        let mut start = 0;
        loop {
            let end = (start + size).min(len);
            let is_last = end == len;
            let short_tail = end - start < self.config.min_chunk_size;
            match windows.last_mut() {
                Some(prev) if is_last && short_tail => prev.1 = len,
                _ => windows.push((start, end)),
            }
            if is_last {
                break;
            }
            start += step;
        }

        windows
            .into_iter()
            .map(|(s, e)| &text[byte_at(s)..byte_at(e)])
            .filter(|w| !w.trim().is_empty())
            .map(str::to_string)
            .collect()
    }

    fn markdown_chunks(&self, text: &str) -> Vec<String> {
        let mut acc = Accumulator::new(&self.config);
        for segment in segment_markdown(text, self.config.atomic_code_blocks) {
            acc.push(segment);
        }
        acc.finish(self.config.min_chunk_size)
    }
}

// ============ Structural segmentation ============

#[derive(Debug, Clone, PartialEq)]
struct Segment {
    text: String,
    /// Never split: a fenced code block (with any heading glued on).
    atomic: bool,
    /// Separator placed before this segment when it follows other text.
    joiner: &'static str,
}

impl Segment {
    fn paragraph(text: String) -> Self {
        Self {
            text,
            atomic: false,
            joiner: "\n\n",
        }
    }
}

fn is_fence(line: &str) -> bool {
    line.trim_start().starts_with("```")
}

fn is_heading(line: &str) -> bool {
    let t = line.trim_start();
    let hashes = t.chars().take_while(|&c| c == '#').count();
    (1..=6).contains(&hashes) && t[hashes..].chars().next().map_or(true, char::is_whitespace)
}

/// True when the pending lines are headings (plus blank spacers) only.
fn heading_only(lines: &[&str]) -> bool {
    lines.iter().any(|l| !l.trim().is_empty())
        && lines.iter().all(|l| l.trim().is_empty() || is_heading(l))
}

fn segment_markdown(text: &str, atomic_code_blocks: bool) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut para: Vec<&str> = Vec::new();
    let mut fence: Option<Vec<&str>> = None;

    fn flush(para: &mut Vec<&str>, segments: &mut Vec<Segment>) {
        let joined = para.join("\n");
        para.clear();
        let joined = joined.trim();
        if !joined.is_empty() {
            segments.push(Segment::paragraph(joined.to_string()));
        }
    }

    fn close_fence(block: Vec<&str>, para: &mut Vec<&str>, segments: &mut Vec<Segment>) {
        let code = block.join("\n");
        let text = if para.is_empty() {
            code
        } else {
            let heading = para.join("\n");
            para.clear();
            format!("{}\n\n{}", heading.trim(), code)
        };
        segments.push(Segment {
            text,
            atomic: true,
            joiner: "\n\n",
        });
    }

    for line in text.lines() {
        if let Some(block) = fence.as_mut() {
            block.push(line);
            if is_fence(line) {
                if let Some(block) = fence.take() {
                    close_fence(block, &mut para, &mut segments);
                }
            }
            continue;
        }

        if atomic_code_blocks && is_fence(line) {
            if !heading_only(&para) {
                flush(&mut para, &mut segments);
            }
            fence = Some(vec![line]);
            continue;
        }

        if line.trim().is_empty() {
            if heading_only(&para) {
                para.push("");
            } else if !para.is_empty() {
                flush(&mut para, &mut segments);
            }
            continue;
        }

        if is_heading(line) && !para.is_empty() && !heading_only(&para) {
            flush(&mut para, &mut segments);
        }
        para.push(line);
    }

    // Unclosed fence runs to the end of the document.
    if let Some(block) = fence.take() {
        close_fence(block, &mut para, &mut segments);
    }
    flush(&mut para, &mut segments);
    segments
}

// ============ Greedy packing ============

struct Draft {
    text: String,
    /// Byte offset where content not carried over from the previous chunk begins.
    fresh_start: usize,
    /// Separator that attached the fresh content to what came before it.
    joiner: &'static str,
}

impl Draft {
    fn fresh(&self) -> &str {
        &self.text[self.fresh_start..]
    }
}

struct Accumulator<'c> {
    config: &'c ChunkingConfig,
    drafts: Vec<Draft>,
    buf: String,
    fresh_start: usize,
    fresh_joiner: &'static str,
    /// Byte offset just past the last atomic segment in `buf`; overlap
    /// seeds never reach back before it.
    atomic_end: usize,
    /// Byte offset where the most recent segment's text begins.
    last_start: Option<usize>,
}

impl<'c> Accumulator<'c> {
    fn new(config: &'c ChunkingConfig) -> Self {
        Self {
            config,
            drafts: Vec::new(),
            buf: String::new(),
            fresh_start: 0,
            fresh_joiner: "",
            atomic_end: 0,
            last_start: None,
        }
    }

    fn has_fresh(&self) -> bool {
        !self.buf[self.fresh_start..].trim().is_empty()
    }

    fn push(&mut self, segment: Segment) {
        let size = self.config.chunk_size;
        let seg_len = char_len(&segment.text);

        if seg_len > size {
            if segment.atomic {
                self.close(None);
                self.drafts.push(Draft {
                    text: segment.text,
                    fresh_start: 0,
                    joiner: segment.joiner,
                });
                self.reset(String::new());
            } else {
                self.push_long(segment);
            }
            return;
        }

        if !self.buf.is_empty()
            && char_len(&self.buf) + char_len(segment.joiner) + seg_len > size
        {
            if self.has_fresh() {
                self.close(Some((seg_len, segment.joiner)));
            } else {
                // Buffer only holds an overlap seed; shrink it to make room.
                let room = size.saturating_sub(seg_len + char_len(segment.joiner));
                let seed = tail_chars(&self.buf, room).trim_start().to_string();
                self.reset(seed);
            }
        }

        let first_fresh = self.buf.len() == self.fresh_start;
        if !self.buf.is_empty() {
            self.buf.push_str(segment.joiner);
        }
        if first_fresh {
            self.fresh_start = self.buf.len();
            self.fresh_joiner = segment.joiner;
        }
        self.last_start = Some(self.buf.len());
        self.buf.push_str(&segment.text);
        if segment.atomic {
            self.atomic_end = self.buf.len();
        }
    }

    /// Split an oversized paragraph into pieces that leave room for the
    /// overlap seed, cutting at newlines or spaces where possible.
    fn push_long(&mut self, segment: Segment) {
        let overlap = self.config.chunk_overlap;
        let max_piece = self.config.chunk_size.saturating_sub(overlap + 2).max(1);
        for (i, piece) in hard_split(&segment.text, max_piece).into_iter().enumerate() {
            self.push(Segment {
                text: piece.to_string(),
                atomic: false,
                joiner: if i == 0 { segment.joiner } else { "" },
            });
        }
    }

    /// Close the current buffer as a draft. With `next`, the new buffer is
    /// seeded with the longer of the overlap tail and the last non-atomic
    /// segment, cut so that `next` still fits.
    fn close(&mut self, next: Option<(usize, &str)>) {
        if !self.has_fresh() {
            self.reset(String::new());
            return;
        }

        let seed = match next {
            Some((next_len, joiner)) if self.config.chunk_overlap > 0 => {
                let room = self
                    .config
                    .chunk_size
                    .saturating_sub(next_len + char_len(joiner));
                let tail = overlap_seed(&self.buf[self.atomic_end..], self.config.chunk_overlap);
                let last = self
                    .last_start
                    .filter(|&start| start >= self.atomic_end)
                    .map_or("", |start| &self.buf[start..]);
                let seed = if char_len(last) > char_len(tail) { last } else { tail };
                overlap_seed(seed, room).trim_start().to_string()
            }
            _ => String::new(),
        };

        let text = std::mem::take(&mut self.buf);
        self.drafts.push(Draft {
            text,
            fresh_start: self.fresh_start,
            joiner: self.fresh_joiner,
        });
        self.reset(seed);
    }

    fn reset(&mut self, seed: String) {
        self.fresh_start = seed.len();
        self.buf = seed;
        self.fresh_joiner = "";
        self.atomic_end = 0;
        self.last_start = None;
    }

    fn finish(mut self, min_chunk_size: usize) -> Vec<String> {
        if self.has_fresh() {
            let text = std::mem::take(&mut self.buf);
            self.drafts.push(Draft {
                text,
                fresh_start: self.fresh_start,
                joiner: self.fresh_joiner,
            });
        }

        let mut out: Vec<String> = Vec::with_capacity(self.drafts.len());
        for draft in self.drafts {
            let fresh = draft.fresh();
            let too_small = char_len(fresh.trim()) < min_chunk_size;
            match out.last_mut() {
                // The draft's seed is a suffix of `prev`, so only the fresh
                // part is appended, with its original separator.
                Some(prev) if too_small => {
                    prev.push_str(draft.joiner);
                    prev.push_str(fresh);
                }
                _ => out.push(draft.text),
            }
        }

        out.into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }
}

// ============ Helpers ============

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// The last `n` characters of `s`.
fn tail_chars(s: &str, n: usize) -> &str {
    if n == 0 {
        return "";
    }
    match s.char_indices().rev().nth(n - 1) {
        Some((idx, _)) => &s[idx..],
        None => s,
    }
}

/// Trailing `overlap` characters of a closed chunk, moved forward to a
/// word start when the cut lands mid-word.
fn overlap_seed(text: &str, overlap: usize) -> &str {
    let tail = tail_chars(text, overlap);
    if tail.len() == text.len() {
        return tail;
    }
    let cut_mid_word = text[..text.len() - tail.len()]
        .chars()
        .next_back()
        .is_some_and(|c| !c.is_whitespace())
        && tail.chars().next().is_some_and(|c| !c.is_whitespace());
    if !cut_mid_word {
        return tail.trim_start();
    }
    match tail.find(char::is_whitespace) {
        Some(pos) => tail[pos..].trim_start(),
        None => tail,
    }
}

/// Cut `text` into raw pieces of at most `max_chars` characters, preferring
/// to end each piece just after a newline or space.
fn hard_split(text: &str, max_chars: usize) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut remaining = text;
    while !remaining.is_empty() {
        let limit = match remaining.char_indices().nth(max_chars) {
            Some((idx, _)) => idx,
            None => {
                pieces.push(remaining);
                break;
            }
        };
        let window = &remaining[..limit];
        let cut = window
            .rfind('\n')
            .or_else(|| window.rfind(' '))
            .filter(|&pos| pos > 0)
            .map(|pos| pos + 1)
            .unwrap_or(limit);
        pieces.push(&remaining[..cut]);
        remaining = &remaining[cut..];
    }
    pieces
}

fn finalize(pieces: Vec<String>, metadata: &ChunkMetadata) -> Vec<TextChunk> {
    let created_at = Utc::now();
    let total = pieces.len();
    pieces
        .into_iter()
        .enumerate()
        .map(|(index, content)| {
            let mut hasher = Sha256::new();
            hasher.update(content.as_bytes());
            TextChunk {
                id: Uuid::new_v4().to_string(),
                hash: format!("{:x}", hasher.finalize()),
                content,
                chunk_index: index,
                total_chunks: total,
                metadata: metadata.clone(),
                created_at,
            }
        })
        .collect()
}
