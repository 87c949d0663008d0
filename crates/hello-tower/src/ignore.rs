//! Paths excluded from instrumentation.

/// One ignore rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IgnoreRule {
    /// Matches the path exactly.
    Exact(String),
    /// Matches any path starting with the prefix (written `"/prefix*"`).
    Prefix(String),
}

impl IgnoreRule {
    /// Parses an entry. Blank entries yield `None`.
    pub fn parse(entry: &str) -> Option<Self> {
        let entry = entry.trim();
        if entry.is_empty() {
            return None;
        }
        match entry.strip_suffix('*') {
            Some(prefix) => Some(Self::Prefix(prefix.to_string())),
            None => Some(Self::Exact(entry.to_string())),
        }
    }

    fn matches(&self, path: &str) -> bool {
        match self {
            Self::Exact(exact) => path == exact,
            Self::Prefix(prefix) => path.starts_with(prefix.as_str()),
        }
    }
}

/// Ordered set of ignore rules, scanned first-match-wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IgnorePaths {
    rules: Vec<IgnoreRule>,
}

impl IgnorePaths {
    /// Builds the set from raw entries, dropping blank ones.
    pub fn new<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            rules: entries
                .into_iter()
                .filter_map(|e| IgnoreRule::parse(e.as_ref()))
                .collect(),
        }
    }

    /// Whether `path` should skip instrumentation. An empty path never
    /// matches.
    pub fn matches(&self, path: &str) -> bool {
        !path.is_empty() && self.rules.iter().any(|rule| rule.matches(path))
    }

    /// The parsed rules, in scan order.
    pub fn rules(&self) -> &[IgnoreRule] {
        &self.rules
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_and_prefix() {
        let ignore = IgnorePaths::new(["/healthz", "/metrics*"]);

        assert!(ignore.matches("/healthz"));
        assert!(ignore.matches("/metrics/foo"));
        assert!(ignore.matches("/metrics"));
        assert!(!ignore.matches("/health"));
        assert!(!ignore.matches("/healthz/deep"));
        assert!(!ignore.matches(""));
    }

    #[test]
    fn test_blank_entries_are_dropped() {
        let ignore = IgnorePaths::new(["  ", "", " /readyz "]);

        assert_eq!(ignore.rules(), &[IgnoreRule::Exact("/readyz".to_string())]);
        assert!(ignore.matches("/readyz"));
    }

    #[test]
    fn test_bare_star_matches_everything_but_empty() {
        let ignore = IgnorePaths::new(["*"]);

        assert!(ignore.matches("/anything"));
        assert!(!ignore.matches(""));
    }

    #[test]
    fn test_empty_set_matches_nothing() {
        assert!(!IgnorePaths::default().matches("/healthz"));
    }
}
