//! Content Heuristic
//!
//! Decides whether response text is real generated output, and whether a
//! "successful" response is really an error page in disguise. Backends differ
//! wildly (newline-delimited JSON events, SSE, plain text, one JSON document),
//! so every check here is a cheap textual sniff driven by [`ContentPatterns`].

use std::sync::Arc;

use regex::{Regex, RegexBuilder};

/// Stream terminator that never counts as content on its own.
pub const DONE_SENTINEL: &str = "data: [DONE]";

/// Rolling buffer is trimmed once it grows past this many characters...
pub const BUFFER_LIMIT: usize = 500;
/// ...down to this many trailing characters.
pub const BUFFER_TAIL: usize = 100;
/// How much of a body the HTML-disguise check looks at.
pub const HEAD_LEN: usize = 256;

const DEFAULT_CONTENT_FIELDS: [&str; 6] = ["content", "text", "value", "response", "reply", "token"];
const DEFAULT_HTML_PREFIXES: [&str; 2] = ["<!doctype html", "<html"];
const DEFAULT_HTML_MARKERS: [&str; 1] = ["cloudflare"];
const DEFAULT_RATE_LIMIT_PHRASES: [&str; 7] = [
    "too many requests",
    "\"code\":429",
    " 429",
    "no capacity available",
    "rate limit",
    "overloaded",
    "capacity",
];

/// Pattern data for the heuristic. Extend per backend instead of editing control flow.
#[derive(Debug, Clone)]
pub struct ContentPatterns {
    content_field: Regex,
    done_sentinel: Regex,
    data_prefix: Regex,
    html_prefixes: Vec<String>,
    html_markers: Vec<String>,
    rate_limit_phrases: Vec<String>,
}

impl ContentPatterns {
    /// Build patterns recognising `"<field>": "<non-empty>"` for each field name.
    pub fn new<S: AsRef<str>>(content_fields: &[S]) -> Result<Self, regex::Error> {
        let alternation = content_fields
            .iter()
            .map(|f| regex::escape(f.as_ref()))
            .collect::<Vec<_>>()
            .join("|");
        let content_field = RegexBuilder::new(&format!(r#""(?:{alternation})"\s*:\s*"[^"]"#))
            .case_insensitive(true)
            .build()?;

        Ok(Self {
            content_field,
            done_sentinel: RegexBuilder::new(r"data:\s*\[DONE\]")
                .case_insensitive(true)
                .build()?,
            data_prefix: RegexBuilder::new(r"data:").case_insensitive(true).build()?,
            html_prefixes: DEFAULT_HTML_PREFIXES.iter().map(|s| s.to_string()).collect(),
            html_markers: DEFAULT_HTML_MARKERS.iter().map(|s| s.to_string()).collect(),
            rate_limit_phrases: DEFAULT_RATE_LIMIT_PHRASES
                .iter()
                .map(|s| s.to_string())
                .collect(),
        })
    }

    /// Add a lowercase body marker that flags an error page (e.g. a proxy vendor name).
    pub fn with_html_marker(mut self, marker: impl Into<String>) -> Self {
        self.html_markers.push(marker.into().to_lowercase());
        self
    }

    pub fn with_rate_limit_phrase(mut self, phrase: impl Into<String>) -> Self {
        self.rate_limit_phrases.push(phrase.into().to_lowercase());
        self
    }

    /// Does this text look like real generated content?
    pub fn has_actual_content(&self, text: &str) -> bool {
        if text.is_empty() || text.trim() == DONE_SENTINEL {
            return false;
        }

        // Looks like JSON: only a populated content-bearing field counts
        if text.contains("\":") {
            return self.content_field.is_match(text);
        }

        let without_done = self.done_sentinel.replace_all(text, "");
        let plain = self.data_prefix.replace_all(&without_done, "");
        !plain.trim().is_empty()
    }

    /// Declared content type says HTML.
    pub fn is_bad_content_type(&self, content_type: &str) -> bool {
        content_type.to_lowercase().contains("text/html")
    }

    /// Body head looks like an HTML/edge-proxy error page.
    pub fn looks_like_html(&self, body: &str) -> bool {
        if body.is_empty() {
            return false;
        }
        let head: String = body.chars().take(HEAD_LEN).collect();
        let head = head.to_lowercase();
        let head = head.trim();
        self.html_prefixes.iter().any(|p| head.starts_with(p.as_str()))
            || self.html_markers.iter().any(|m| head.contains(m.as_str()))
    }

    /// Either signal turns an otherwise successful response into a failure.
    pub fn is_disguised_failure(&self, content_type: &str, body_head: &str) -> bool {
        self.is_bad_content_type(content_type) || self.looks_like_html(body_head)
    }

    /// Error text that reads like a rate-limit or overload rejection.
    pub fn looks_like_rate_limit(&self, description: &str) -> bool {
        let lowered = description.to_lowercase();
        self.rate_limit_phrases
            .iter()
            .any(|p| lowered.contains(p.as_str()))
    }
}

impl Default for ContentPatterns {
    fn default() -> Self {
        Self::new(&DEFAULT_CONTENT_FIELDS).expect("built-in content patterns are valid")
    }
}

/// Incremental UTF-8 decoder that carries split multi-byte sequences across chunks.
#[derive(Debug, Default)]
struct Utf8StreamDecoder {
    pending: Vec<u8>,
}

impl Utf8StreamDecoder {
    fn decode(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut out = String::new();
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(s) => {
                    out.push_str(s);
                    self.pending.clear();
                    break;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match e.error_len() {
                        Some(bad) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + bad);
                        }
                        None => {
                            // incomplete sequence at the end, wait for more bytes
                            self.pending.drain(..valid);
                            break;
                        }
                    }
                }
            }
        }
        out
    }

    fn finish(&mut self) -> String {
        let rest = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        rest
    }
}

/// Per-round rolling sniffer fed with response chunks as they arrive.
#[derive(Debug)]
pub struct ContentSniffer {
    patterns: Arc<ContentPatterns>,
    decoder: Utf8StreamDecoder,
    buffer: String,
    head: String,
    head_chars: usize,
    confirmed: bool,
}

impl ContentSniffer {
    pub fn new(patterns: Arc<ContentPatterns>) -> Self {
        Self {
            patterns,
            decoder: Utf8StreamDecoder::default(),
            buffer: String::new(),
            head: String::new(),
            head_chars: 0,
            confirmed: false,
        }
    }

    /// Feed raw bytes. Returns true when this chunk confirmed content.
    pub fn feed(&mut self, bytes: &[u8]) -> bool {
        if bytes.is_empty() {
            return false;
        }
        let text = self.decoder.decode(bytes);
        self.feed_text(&text)
    }

    /// Feed already-decoded text. Returns true when this text confirmed content.
    pub fn feed_text(&mut self, text: &str) -> bool {
        self.capture_head(text);
        if self.confirmed || text.is_empty() {
            return false;
        }

        self.buffer.push_str(text);
        if self.patterns.has_actual_content(&self.buffer) {
            self.confirmed = true;
            self.buffer.clear();
            return true;
        }

        let chars = self.buffer.chars().count();
        if chars > BUFFER_LIMIT {
            self.buffer = self.buffer.chars().skip(chars - BUFFER_TAIL).collect();
        }
        false
    }

    /// Flush any bytes still held by the decoder.
    pub fn finish(&mut self) -> bool {
        let rest = self.decoder.finish();
        self.feed_text(&rest)
    }

    pub fn confirmed(&self) -> bool {
        self.confirmed
    }

    /// First characters seen on the body, for the HTML-disguise check.
    pub fn head(&self) -> &str {
        &self.head
    }

    #[cfg(test)]
    fn buffered_chars(&self) -> usize {
        self.buffer.chars().count()
    }

    fn capture_head(&mut self, text: &str) {
        if self.head_chars >= HEAD_LEN {
            return;
        }
        for c in text.chars().take(HEAD_LEN - self.head_chars) {
            self.head.push(c);
            self.head_chars += 1;
        }
    }
}
