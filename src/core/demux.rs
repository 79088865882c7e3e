//! Incremental demultiplexer for streamed assistant responses.
//!
//! A response may start with a `__TRACE_ID__:<id>\n` header and may embed a
//! single `<thinking>...</thinking>` span, possibly still open while the model
//! is generating. [`StreamDemux`] keeps one growing buffer for the whole
//! response and derives the visible content, the thought text and the last
//! preview code block from it after every chunk. Results do not depend on
//! where chunk boundaries fall.

use crate::core::fence::{CodeBlock, FenceScanner};

pub const TRACE_ID_PREFIX: &str = "__TRACE_ID__:";
pub const THINKING_OPEN: &str = "<thinking>";
pub const THINKING_CLOSE: &str = "</thinking>";

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DemuxSnapshot {
    pub content: String,
    pub thought: Option<String>,
    pub is_thinking: bool,
    pub trace_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DemuxUpdate {
    pub snapshot: DemuxSnapshot,
    /// Present only when the last preview block changed with this chunk.
    pub code_block: Option<CodeBlock>,
    /// Whether the raw buffer grew; held header bytes do not count.
    pub buffer_changed: bool,
}

#[derive(Debug)]
enum Header {
    Pending(String),
    Resolved,
}

enum HeaderDecision {
    NeedMore,
    Trace { id: String, body_start: usize },
    Absent,
}

fn classify_header(held: &str) -> HeaderDecision {
    if held.len() < TRACE_ID_PREFIX.len() {
        return if TRACE_ID_PREFIX.starts_with(held) {
            HeaderDecision::NeedMore
        } else {
            HeaderDecision::Absent
        };
    }
    if !held.starts_with(TRACE_ID_PREFIX) {
        return HeaderDecision::Absent;
    }
    match held.find('\n') {
        Some(newline) => HeaderDecision::Trace {
            id: held[TRACE_ID_PREFIX.len()..newline]
                .trim_end_matches('\r')
                .to_string(),
            body_start: newline + 1,
        },
        None => HeaderDecision::NeedMore,
    }
}

/// Largest char boundary at or below `len - (tag_len - 1)`.
fn overlap_floor(buffer: &str, tag_len: usize) -> usize {
    let mut index = buffer.len().saturating_sub(tag_len.saturating_sub(1));
    while !buffer.is_char_boundary(index) {
        index -= 1;
    }
    index
}

#[derive(Debug, Default)]
struct ThinkingScanner {
    start: Option<usize>,
    end: Option<usize>,
    search_from: usize,
}

impl ThinkingScanner {
    /// Returns true when the open tag was found during this call.
    fn advance(&mut self, buffer: &str) -> bool {
        if self.end.is_some() {
            return false;
        }

        let mut opened_now = false;
        let start = match self.start {
            Some(start) => start,
            None => match buffer[self.search_from..].find(THINKING_OPEN) {
                Some(rel) => {
                    let start = self.search_from + rel;
                    self.start = Some(start);
                    self.search_from = start + THINKING_OPEN.len();
                    opened_now = true;
                    start
                }
                None => {
                    self.search_from = overlap_floor(buffer, THINKING_OPEN.len());
                    return false;
                }
            },
        };

        match buffer[self.search_from..].find(THINKING_CLOSE) {
            Some(rel) => self.end = Some(self.search_from + rel),
            None => {
                self.search_from = overlap_floor(buffer, THINKING_CLOSE.len())
                    .max(start + THINKING_OPEN.len());
            }
        }
        opened_now
    }

    fn split(&self, buffer: &str) -> (String, Option<String>, bool) {
        match (self.start, self.end) {
            (None, _) => (buffer.to_string(), None, false),
            (Some(start), None) => (
                buffer[..start].to_string(),
                Some(buffer[start + THINKING_OPEN.len()..].to_string()),
                true,
            ),
            (Some(start), Some(end)) => {
                let mut content = String::with_capacity(buffer.len());
                content.push_str(&buffer[..start]);
                content.push_str(&buffer[end + THINKING_CLOSE.len()..]);
                (
                    content,
                    Some(buffer[start + THINKING_OPEN.len()..end].to_string()),
                    false,
                )
            }
        }
    }
}

#[derive(Debug)]
pub struct StreamDemux {
    header: Header,
    trace_id: Option<String>,
    buffer: String,
    thinking: ThinkingScanner,
    fences: FenceScanner,
    last_block: Option<CodeBlock>,
}

impl Default for StreamDemux {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamDemux {
    pub fn new() -> Self {
        Self {
            header: Header::Pending(String::new()),
            trace_id: None,
            buffer: String::new(),
            thinking: ThinkingScanner::default(),
            fences: FenceScanner::new(),
            last_block: None,
        }
    }

    /// The accumulated response with any trace header removed.
    pub fn raw(&self) -> &str {
        &self.buffer
    }

    pub fn trace_id(&self) -> Option<&str> {
        self.trace_id.as_deref()
    }

    pub fn last_code_block(&self) -> Option<&CodeBlock> {
        self.last_block.as_ref()
    }

    pub fn push(&mut self, chunk: &str) -> DemuxUpdate {
        let mut held = match std::mem::replace(&mut self.header, Header::Resolved) {
            Header::Resolved => return self.append(chunk),
            Header::Pending(held) => held,
        };
        held.push_str(chunk);

        match classify_header(&held) {
            HeaderDecision::NeedMore => {
                self.header = Header::Pending(held);
                self.update(false)
            }
            HeaderDecision::Trace { id, body_start } => {
                self.set_trace_id(id);
                self.append(&held[body_start..])
            }
            HeaderDecision::Absent => self.append(&held),
        }
    }

    /// Releases bytes still held for header detection at end of stream.
    pub fn finish(&mut self) -> DemuxUpdate {
        let Header::Pending(held) = std::mem::replace(&mut self.header, Header::Resolved) else {
            return self.update(false);
        };
        if let Some(id) = held.strip_prefix(TRACE_ID_PREFIX) {
            self.set_trace_id(id.trim_end_matches('\r').to_string());
            return self.update(false);
        }
        self.append(&held)
    }

    fn set_trace_id(&mut self, id: String) {
        let id = id.trim().to_string();
        if !id.is_empty() {
            self.trace_id = Some(id);
        }
    }

    fn append(&mut self, body: &str) -> DemuxUpdate {
        if body.is_empty() {
            return self.update(false);
        }
        self.buffer.push_str(body);
        if self.thinking.advance(&self.buffer) {
            // Visible content was cut back to the text before the open tag.
            self.fences.reset();
        }
        self.update(true)
    }

    fn update(&mut self, buffer_changed: bool) -> DemuxUpdate {
        let (content, thought, is_thinking) = self.thinking.split(&self.buffer);

        let mut code_block = None;
        if buffer_changed {
            if let Some(block) = self.fences.scan(&content) {
                if self.last_block.as_ref() != Some(block) {
                    self.last_block = Some(block.clone());
                    code_block = Some(block.clone());
                }
            }
        }

        DemuxUpdate {
            snapshot: DemuxSnapshot {
                content,
                thought,
                is_thinking,
                trace_id: self.trace_id.clone(),
            },
            code_block,
            buffer_changed,
        }
    }
}
