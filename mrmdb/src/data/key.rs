//! Compound key normalization.
//!
//! Library keys arrive with stray surrounding or embedded whitespace and
//! inconsistent case. Two keys are the same compound when they agree after
//! trimming, after dropping all whitespace, or ignoring case.

/// Trimmed key; `None` for empty values and textual null markers.
///
/// ```
/// use mrmdb::data::key::normalize;
///
/// assert_eq!(normalize("  ABC-DEF "), Some("ABC-DEF"));
/// assert_eq!(normalize("None"), None);
/// ```
pub fn normalize(raw: &str) -> Option<&str> {
    let key = raw.trim();
    if key.is_empty() || key == "nan" || key.eq_ignore_ascii_case("none") {
        None
    } else {
        Some(key)
    }
}

/// Key with every whitespace character removed.
pub fn strip_whitespace(key: &str) -> String {
    key.chars().filter(|c| !c.is_whitespace()).collect()
}

/// Case- and whitespace-insensitive form of a key.
///
/// ```
/// assert_eq!(mrmdb::data::key::fold(" Ab C "), "abc");
/// ```
pub fn fold(key: &str) -> String {
    strip_whitespace(key).to_lowercase()
}

/// Row-level key predicate applied after an index lookup.
///
/// A partition listed under a key may hold other keys as well, so every row
/// is tested with exact, whitespace-stripped and case-insensitive equality,
/// in that order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyMatcher {
    exact: String,
    stripped: String,
    folded: String,
}

impl KeyMatcher {
    pub fn new(key: &str) -> Self {
        let exact = key.trim().to_string();
        KeyMatcher {
            stripped: strip_whitespace(&exact),
            folded: fold(&exact),
            exact,
        }
    }

    pub fn key(&self) -> &str {
        &self.exact
    }

    pub fn matches(&self, candidate: &str) -> bool {
        let candidate = candidate.trim();
        candidate == self.exact
            || strip_whitespace(candidate) == self.stripped
            || fold(candidate) == self.folded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("  ABC-DEF \t"), Some("ABC-DEF"));
        assert_eq!(normalize("   "), None);
        assert_eq!(normalize("nan"), None);
        assert_eq!(normalize("None"), None);
    }

    #[test]
    fn test_strip_whitespace() {
        assert_eq!(strip_whitespace("AB C\tD\nE"), "ABCDE");
        assert_eq!(fold(" Ab c "), "abc");
    }

    #[test]
    fn test_matcher_variants() {
        let matcher = KeyMatcher::new(" XYZABC-UHFFFAOYSA-N ");
        assert!(matcher.matches("XYZABC-UHFFFAOYSA-N"));
        assert!(matcher.matches("XYZ ABC-UHFFFAOYSA-N"));
        assert!(matcher.matches("xyzabc-uhfffaoysa-n"));
        assert!(matcher.matches("xyz abc-UHFFFAOYSA-n"));
        assert!(!matcher.matches("XYZABD-UHFFFAOYSA-N"));
        assert_eq!(matcher.key(), "XYZABC-UHFFFAOYSA-N");
    }
}
