use wildmatch::WildMatch;

/// A glob-style key pattern, compiled once and matched against many keys.
///
/// `*` matches any run of characters and `?` exactly one character. Every other character,
/// including the ones with a special meaning in regular expressions, matches itself. Keys that
/// are not valid UTF-8 are matched with each invalid sequence read as one U+FFFD character.
#[derive(Debug, Clone)]
pub struct Pattern {
    source: String,
    matcher: WildMatch,
}

impl Pattern {
    pub fn new(source: &str) -> Pattern {
        Pattern {
            source: source.to_string(),
            matcher: WildMatch::new(source),
        }
    }

    pub fn matches(&self, key: impl AsRef<[u8]>) -> bool {
        self.source == "*" || self.matcher.matches(&String::from_utf8_lossy(key.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}

impl Default for Pattern {
    fn default() -> Self {
        Pattern::new("*")
    }
}
