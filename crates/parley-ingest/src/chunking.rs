//! Text chunking.
//!
//! Sized strategies (FIXED, RECURSIVE, SEMANTIC, CODE) cut documents into
//! contiguous slices of the source. Each chunk after the first begins with the
//! last `chunk_overlap` characters preceding its own body, so dropping those
//! characters from every later chunk and concatenating gives back the source.
//! Header strategies (MARKDOWN_HEADERS, HTML_HEADERS) cut at headings and
//! record the heading path as metadata instead.
//!
//! Sizes count characters, offsets are byte positions.

use std::ops::Range;

use once_cell::sync::Lazy;
use parley_core::{
    Chunk, ChunkingSpec, ChunkingStrategy, CodeLanguage, Document, Error, Metadata, Result,
};
use regex::Regex;
use serde_json::json;
use tracing::warn;

/// Separators for RECURSIVE and SEMANTIC when none are given.
pub const DEFAULT_SEPARATORS: [&str; 4] = ["\n\n", "\n", " ", ""];

/// Separator for FIXED when none is given.
pub const DEFAULT_FIXED_SEPARATOR: &str = "\n";

static MD_HEADER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(#{1,3})\s+(.*)$").unwrap());
static HTML_HEADER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<h([1-3])\b[^>]*>(.*?)</h[1-3]\s*>").unwrap());
static HTML_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<[^>]*>").unwrap());
static HTML_SKIP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<(script|style)\b[^>]*>.*?</(script|style)\s*>").unwrap());
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Where a separator ends up once the text is cut.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeparatorPlacement {
    /// Kept at the end of the preceding segment.
    End,
    /// Kept at the start of the following segment (code keywords).
    Start,
}

/// Size-bounded chunker with overlap.
#[derive(Debug, Clone)]
pub struct RecursiveChunker {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    separators: Vec<String>,
    placement: SeparatorPlacement,
    /// When false only the first separator is used and oversized segments
    /// are kept whole.
    recursive: bool,
}

impl RecursiveChunker {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        Self {
            chunk_size,
            chunk_overlap,
            separators: DEFAULT_SEPARATORS.iter().map(|s| s.to_string()).collect(),
            placement: SeparatorPlacement::End,
            recursive: true,
        }
    }

    pub fn fixed(chunk_size: usize, chunk_overlap: usize, separator: impl Into<String>) -> Self {
        Self {
            separators: vec![separator.into()],
            recursive: false,
            ..Self::new(chunk_size, chunk_overlap)
        }
    }

    pub fn with_separators(mut self, separators: Vec<String>) -> Self {
        self.separators = separators;
        self
    }

    pub fn with_placement(mut self, placement: SeparatorPlacement) -> Self {
        self.placement = placement;
        self
    }

    pub fn separators(&self) -> &[String] {
        &self.separators
    }

    /// Byte ranges of each chunk within `text`.
    pub fn chunk_ranges(&self, text: &str) -> Vec<Range<usize>> {
        if text.is_empty() {
            return Vec::new();
        }

        let mut segments = Vec::new();
        let separators = if self.recursive {
            &self.separators[..]
        } else {
            &self.separators[..self.separators.len().min(1)]
        };
        self.segment(text, 0, separators, &mut segments);

        let bodies = self.merge(text, &segments);
        bodies
            .into_iter()
            .enumerate()
            .map(|(i, body)| {
                if i == 0 {
                    body
                } else {
                    back_chars(text, body.start, self.chunk_overlap)..body.end
                }
            })
            .collect()
    }

    pub fn chunk<'a>(&self, text: &'a str) -> Vec<(usize, &'a str)> {
        self.chunk_ranges(text)
            .into_iter()
            .map(|r| (r.start, &text[r]))
            .collect()
    }

    fn budget(&self) -> usize {
        self.chunk_size.saturating_sub(self.chunk_overlap).max(1)
    }

    /// Cut `piece` (located at `base` in the source) into segments no longer
    /// than the body budget, descending through the separator list.
    fn segment(&self, piece: &str, base: usize, separators: &[String], out: &mut Vec<Range<usize>>) {
        let Some((sep, rest)) = separators.split_first() else {
            out.push(base..base + piece.len());
            return;
        };

        let mut at = base;
        for part in split_keeping(piece, sep, self.placement) {
            if char_len(part) > self.budget() && !rest.is_empty() {
                self.segment(part, at, rest, out);
            } else {
                out.push(at..at + part.len());
            }
            at += part.len();
        }
    }

    /// Greedily pack contiguous segments into chunk bodies. The first chunk
    /// may use the full size; later bodies leave room for the overlap prefix.
    /// The first body stays open until it holds more than `chunk_overlap`
    /// characters, so every overlap prefix lies inside its predecessor.
    fn merge(&self, text: &str, segments: &[Range<usize>]) -> Vec<Range<usize>> {
        let mut bodies: Vec<Range<usize>> = Vec::new();
        let mut current: Option<(Range<usize>, usize)> = None;

        for seg in segments {
            let len = char_len(&text[seg.clone()]);
            current = match current.take() {
                None => Some((seg.clone(), len)),
                Some((range, used)) => {
                    let capacity = if bodies.is_empty() {
                        self.chunk_size
                    } else {
                        self.budget()
                    };
                    let too_short = bodies.is_empty() && used <= self.chunk_overlap;
                    if used + len <= capacity || too_short {
                        Some((range.start..seg.end, used + len))
                    } else {
                        bodies.push(range);
                        Some((seg.clone(), len))
                    }
                }
            };
        }

        if let Some((range, _)) = current {
            bodies.push(range);
        }
        bodies
    }
}

/// Split keeping separators attached, so the parts concatenate back to `text`.
fn split_keeping<'a>(text: &'a str, sep: &str, placement: SeparatorPlacement) -> Vec<&'a str> {
    if sep.is_empty() {
        return text
            .char_indices()
            .map(|(i, c)| &text[i..i + c.len_utf8()])
            .collect();
    }

    let mut parts = Vec::new();
    let mut last = 0;
    for (idx, _) in text.match_indices(sep) {
        let cut = match placement {
            SeparatorPlacement::End => idx + sep.len(),
            SeparatorPlacement::Start => idx,
        };
        if cut > last {
            parts.push(&text[last..cut]);
            last = cut;
        }
    }
    if last < text.len() {
        parts.push(&text[last..]);
    }
    parts
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Byte position `n` characters before `pos`, or 0 if fewer exist.
fn back_chars(text: &str, pos: usize, n: usize) -> usize {
    if n == 0 {
        return pos;
    }
    text[..pos]
        .char_indices()
        .rev()
        .take(n)
        .last()
        .map(|(i, _)| i)
        .unwrap_or(pos)
}

/// Language keywords that start a new top-level construct, most significant
/// first, followed by the generic fallbacks.
pub fn code_separators(language: CodeLanguage) -> Vec<String> {
    let keywords: &[&str] = match language {
        CodeLanguage::Python => &["\nclass ", "\ndef ", "\n\tdef "],
        CodeLanguage::Rust => &[
            "\nfn ", "\nconst ", "\nlet ", "\nif ", "\nwhile ", "\nfor ", "\nloop ", "\nmatch ",
        ],
        CodeLanguage::Javascript => &[
            "\nfunction ", "\nconst ", "\nlet ", "\nvar ", "\nclass ", "\nif ", "\nfor ",
            "\nwhile ", "\nswitch ", "\ncase ", "\ndefault ",
        ],
        CodeLanguage::Go => &[
            "\nfunc ", "\nvar ", "\nconst ", "\ntype ", "\nif ", "\nfor ", "\nswitch ", "\ncase ",
        ],
        CodeLanguage::Java => &[
            "\nclass ", "\npublic ", "\nprotected ", "\nprivate ", "\nstatic ", "\nif ", "\nfor ",
            "\nwhile ", "\nswitch ", "\ncase ",
        ],
    };
    keywords
        .iter()
        .chain(DEFAULT_SEPARATORS.iter())
        .map(|s| s.to_string())
        .collect()
}

// ---------------------------------------------------------------
// Header splitting
// ---------------------------------------------------------------

/// A section under a heading path.
#[derive(Debug, Clone, PartialEq)]
pub struct Section {
    pub offset: usize,
    pub content: String,
    /// `(level, title)` for each open heading, outermost first.
    pub headers: Vec<(usize, String)>,
}

fn push_header(path: &mut Vec<(usize, String)>, level: usize, title: String) {
    path.retain(|(l, _)| *l < level);
    path.push((level, title));
}

/// Split markdown at `#`, `##` and `###` headings outside fenced code.
pub fn split_markdown_sections(text: &str) -> Vec<Section> {
    let mut sections = Vec::new();
    let mut path: Vec<(usize, String)> = Vec::new();
    let mut lines: Vec<&str> = Vec::new();
    let mut start: Option<usize> = None;
    let mut fence: Option<&str> = None;

    let mut flush = |lines: &mut Vec<&str>, start: &mut Option<usize>, path: &[(usize, String)]| {
        let content = lines.join("\n").trim().to_string();
        match *start {
            Some(offset) if !content.is_empty() => sections.push(Section {
                offset,
                content,
                headers: path.to_vec(),
            }),
            _ => {}
        }
        lines.clear();
        *start = None;
    };

    let mut pos = 0;
    for raw in text.split_inclusive('\n') {
        let line_start = pos;
        pos += raw.len();
        let line = raw.trim_end_matches(['\n', '\r']);
        let trimmed = line.trim_start();

        let marker = if trimmed.starts_with("```") {
            Some("```")
        } else if trimmed.starts_with("~~~") {
            Some("~~~")
        } else {
            None
        };
        match (fence, marker) {
            (None, Some(m)) => fence = Some(m),
            (Some(open), Some(m)) if open == m => fence = None,
            _ => {}
        }

        if fence.is_none() && marker.is_none() {
            if let Some(caps) = MD_HEADER.captures(line) {
                flush(&mut lines, &mut start, &path);
                push_header(&mut path, caps[1].len(), caps[2].trim().to_string());
                continue;
            }
        }

        if start.is_none() && !line.trim().is_empty() {
            start = Some(line_start);
        }
        if start.is_some() {
            lines.push(line);
        }
    }
    flush(&mut lines, &mut start, &path);
    sections
}

fn html_text(fragment: &str) -> String {
    let without_code = HTML_SKIP.replace_all(fragment, " ");
    let stripped = HTML_TAG.replace_all(&without_code, " ");
    let decoded = stripped
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&");
    WHITESPACE.replace_all(&decoded, " ").trim().to_string()
}

/// Split HTML at `<h1>`..`<h3>` elements; section text is tag-stripped.
pub fn split_html_sections(text: &str) -> Vec<Section> {
    let mut sections = Vec::new();
    let mut path: Vec<(usize, String)> = Vec::new();
    let mut region_start = 0;

    let mut emit = |range: Range<usize>, path: &[(usize, String)]| {
        let content = html_text(&text[range.clone()]);
        if !content.is_empty() {
            sections.push(Section {
                offset: range.start,
                content,
                headers: path.to_vec(),
            });
        }
    };

    for caps in HTML_HEADER.captures_iter(text) {
        let whole = caps.get(0).map(|m| m.range()).unwrap_or(0..0);
        emit(region_start..whole.start, &path);
        let level = caps[1].parse::<usize>().unwrap_or(1);
        push_header(&mut path, level, html_text(&caps[2]));
        region_start = whole.end;
    }
    emit(region_start..text.len(), &path);
    sections
}

// ---------------------------------------------------------------
// Strategy selection
// ---------------------------------------------------------------

/// A configured document splitter.
#[derive(Debug, Clone)]
pub enum Splitter {
    Sized(RecursiveChunker),
    MarkdownHeaders,
    HtmlHeaders,
}

/// Validate a chunking configuration and build its splitter.
pub fn select_splitter(spec: &ChunkingSpec) -> Result<Splitter> {
    let sized = !matches!(
        spec.strategy,
        ChunkingStrategy::MarkdownHeaders | ChunkingStrategy::HtmlHeaders
    );
    if sized {
        if spec.chunk_size == 0 {
            return Err(Error::ChunkingConfig("chunk_size must be positive".into()));
        }
        if spec.chunk_overlap >= spec.chunk_size {
            return Err(Error::ChunkingConfig(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                spec.chunk_overlap, spec.chunk_size
            )));
        }
    }

    let explicit = spec.separators.clone().filter(|s| !s.is_empty());
    let splitter = match spec.strategy {
        ChunkingStrategy::Fixed => {
            if matches!(&spec.separators, Some(s) if s.is_empty()) {
                return Err(Error::ChunkingConfig(
                    "FIXED needs at least one separator".into(),
                ));
            }
            let separator = explicit
                .and_then(|s| s.into_iter().next())
                .unwrap_or_else(|| DEFAULT_FIXED_SEPARATOR.to_string());
            Splitter::Sized(RecursiveChunker::fixed(
                spec.chunk_size,
                spec.chunk_overlap,
                separator,
            ))
        }
        ChunkingStrategy::Recursive => {
            let mut chunker = RecursiveChunker::new(spec.chunk_size, spec.chunk_overlap);
            if let Some(separators) = explicit {
                chunker = chunker.with_separators(separators);
            }
            Splitter::Sized(chunker)
        }
        ChunkingStrategy::Semantic => {
            warn!("SEMANTIC chunking is not available, using RECURSIVE with default separators");
            Splitter::Sized(RecursiveChunker::new(spec.chunk_size, spec.chunk_overlap))
        }
        ChunkingStrategy::Code => {
            let language = spec.language.unwrap_or_default();
            Splitter::Sized(
                RecursiveChunker::new(spec.chunk_size, spec.chunk_overlap)
                    .with_separators(code_separators(language))
                    .with_placement(SeparatorPlacement::Start),
            )
        }
        ChunkingStrategy::MarkdownHeaders => Splitter::MarkdownHeaders,
        ChunkingStrategy::HtmlHeaders => Splitter::HtmlHeaders,
    };
    Ok(splitter)
}

impl Splitter {
    /// Cut a document into chunks carrying its metadata plus `chunk_index`.
    pub fn split(&self, document: &Document) -> Vec<Chunk> {
        let reference = document.reference();
        let text = document.content.as_str();

        let pieces: Vec<(usize, String, Metadata)> = match self {
            Splitter::Sized(chunker) => chunker
                .chunk(text)
                .into_iter()
                .map(|(offset, content)| (offset, content.to_string(), Metadata::new()))
                .collect(),
            Splitter::MarkdownHeaders => sections_with_headers(split_markdown_sections(text)),
            Splitter::HtmlHeaders => sections_with_headers(split_html_sections(text)),
        };

        pieces
            .into_iter()
            .enumerate()
            .map(|(index, (offset, content, extra))| {
                let mut metadata = document.metadata.clone();
                metadata.extend(extra);
                metadata.insert("chunk_index".into(), json!(index));
                Chunk {
                    content,
                    metadata,
                    source_document_ref: reference.clone(),
                    offset,
                }
            })
            .collect()
    }
}

fn sections_with_headers(sections: Vec<Section>) -> Vec<(usize, String, Metadata)> {
    sections
        .into_iter()
        .map(|s| {
            let metadata = s
                .headers
                .into_iter()
                .map(|(level, title)| (format!("Header {}", level), json!(title)))
                .collect();
            (s.offset, s.content, metadata)
        })
        .collect()
}
