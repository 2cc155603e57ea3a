use regex::Regex;

/// A compiled key pattern, matched against full (prefixed) store keys.
///
/// Patterns containing `*` are translated to an anchored regex where each
/// `*` matches any character sequence; patterns without a wildcard match by
/// plain prefix.
#[derive(Debug, Clone)]
pub(crate) enum KeyPattern {
    Prefix(String),
    Wildcard(Regex),
}

impl KeyPattern {
    pub fn compile(pattern: &str) -> Self {
        if !pattern.contains('*') {
            return Self::Prefix(pattern.to_string());
        }

        let escaped = pattern
            .split('*')
            .map(regex::escape)
            .collect::<Vec<_>>()
            .join(".*");
        let anchored = format!("^{escaped}$");
        Self::Wildcard(Regex::new(&anchored).expect("escaped pattern is always a valid regex"))
    }

    pub fn matches(&self, full_key: &str) -> bool {
        match self {
            Self::Prefix(prefix) => full_key.starts_with(prefix),
            Self::Wildcard(regex) => regex.is_match(full_key),
        }
    }
}
