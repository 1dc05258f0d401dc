//! Generation request recognition.
//!
//! A call is a generation call when it is a POST, its URL hits none of the
//! deny patterns (administrative endpoints), and it hits at least one allow
//! pattern. Deny always wins.

use regex::{Regex, RegexBuilder};

/// Chat/completion endpoints across backend families, most specific first.
pub const DEFAULT_ALLOW: [&str; 12] = [
    r"/api/openai/chat/completions",
    r"/api/openai/completions",
    r"/api/chat/completions",
    r"/api/extra/generate",
    r"/api/textgen.*generate",
    r"/api/kobold.*generate",
    r"/api/ollama.*generate",
    r"/api/vllm.*generate",
    r"/api/claude.*(chat|complete)",
    r"/api/gemini.*(chat|generate)",
    r"/api/.*/generate",
    r"/api/.*(chat|completions|generate)",
];

pub const DEFAULT_DENY: [&str; 1] =
    [r"/api/(characters|chats|history|profile|settings|quick|presets?|images?|assets?)\b"];

#[derive(Debug, Clone)]
pub struct GenerationMatcher {
    allow: Vec<Regex>,
    deny: Vec<Regex>,
}

impl GenerationMatcher {
    pub fn new<A, D>(allow: &[A], deny: &[D]) -> Result<Self, regex::Error>
    where
        A: AsRef<str>,
        D: AsRef<str>,
    {
        Ok(Self {
            allow: compile(allow)?,
            deny: compile(deny)?,
        })
    }

    pub fn is_generation(&self, method: &str, url: &str) -> bool {
        if !method.eq_ignore_ascii_case("POST") {
            return false;
        }
        if self.deny.iter().any(|r| r.is_match(url)) {
            return false;
        }
        self.allow.iter().any(|r| r.is_match(url))
    }
}

impl Default for GenerationMatcher {
    fn default() -> Self {
        Self::new(&DEFAULT_ALLOW, &DEFAULT_DENY).expect("built-in endpoint patterns are valid")
    }
}

fn compile<S: AsRef<str>>(patterns: &[S]) -> Result<Vec<Regex>, regex::Error> {
    patterns
        .iter()
        .map(|p| RegexBuilder::new(p.as_ref()).case_insensitive(true).build())
        .collect()
}
