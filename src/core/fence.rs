//! Fenced code block extraction for live previews.

const FENCE: &str = "```";

/// Info-string tags whose blocks are eligible as preview artifacts.
pub const PREVIEW_LANGUAGES: &[&str] = &[
    "jsx",
    "tsx",
    "javascript",
    "js",
    "react",
    "typescript",
    "ts",
    "html",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeBlock {
    /// Lowercased first word of the info string; `None` for untagged fences.
    pub language: Option<String>,
    pub content: String,
}

fn is_preview_language(tag: &str) -> bool {
    PREVIEW_LANGUAGES.iter().any(|lang| lang.eq_ignore_ascii_case(tag))
}

/// Returns the last complete preview-eligible block in `text`.
pub fn extract_last_code_block(text: &str) -> Option<CodeBlock> {
    let mut scanner = FenceScanner::new();
    scanner.scan(text).cloned()
}

/// Resumable scanner over text that only grows between calls.
///
/// Complete blocks are never rescanned; an unterminated fence is revisited on
/// the next call. Call [`FenceScanner::reset`] when the text is rewritten
/// rather than extended.
#[derive(Debug, Default, Clone)]
pub struct FenceScanner {
    resume_at: usize,
    last: Option<CodeBlock>,
}

impl FenceScanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.resume_at = 0;
        self.last = None;
    }

    pub fn last(&self) -> Option<&CodeBlock> {
        self.last.as_ref()
    }

    pub fn scan(&mut self, text: &str) -> Option<&CodeBlock> {
        if self.resume_at > text.len() || !text.is_char_boundary(self.resume_at) {
            self.reset();
        }

        let mut pos = self.resume_at;
        while let Some(open_rel) = text[pos..].find(FENCE) {
            let body_start = pos + open_rel + FENCE.len();
            let rest = &text[body_start..];
            let Some(close_rel) = rest.find(FENCE) else {
                break;
            };

            let block = match rest[..close_rel].find('\n') {
                None => Some(CodeBlock {
                    language: None,
                    content: rest[..close_rel].trim_start().to_string(),
                }),
                Some(newline) => {
                    let info = rest[..newline].trim();
                    let tag = info.split_whitespace().next().unwrap_or("");
                    if tag.is_empty() || is_preview_language(tag) {
                        Some(CodeBlock {
                            language: (!tag.is_empty()).then(|| tag.to_ascii_lowercase()),
                            content: rest[newline + 1..close_rel].trim_start().to_string(),
                        })
                    } else {
                        None
                    }
                }
            };

            if block.is_some() {
                self.last = block;
            }
            pos = body_start + close_rel + FENCE.len();
            self.resume_at = pos;
        }

        self.last.as_ref()
    }
}
