//! Fuzzy name similarity used as the matcher's last resort.

/// Minimum similarity for a fuzzy watchlist match.
pub const FUZZY_MATCH_THRESHOLD: f64 = 0.8;

/// Lowercase, punctuation to spaces, whitespace collapsed.
pub fn normalize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .flat_map(char::to_lowercase)
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Jaro-Winkler similarity of the normalized names, rounded to 3 decimals.
pub fn similarity(a: &str, b: &str) -> f64 {
    let a = normalize(a);
    let b = normalize(b);
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    (strsim::jaro_winkler(&a, &b) * 1000.0).round() / 1000.0
}

pub fn is_fuzzy_match(a: &str, b: &str) -> bool {
    similarity(a, b) >= FUZZY_MATCH_THRESHOLD
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_case_and_punctuation() {
        assert_eq!(
            normalize("  Council on American-Islamic   Relations "),
            "council on american islamic relations"
        );
    }

    #[test]
    fn identical_after_normalization_scores_one() {
        assert_eq!(similarity("CAIR", "cair"), 1.0);
    }

    #[test]
    fn near_spelling_matches() {
        assert!(is_fuzzy_match("Netanyahu", "Netanyahoo"));
        assert!(!is_fuzzy_match("Gaza", "Ukraine"));
    }

    #[test]
    fn bounded_precision() {
        let s = similarity("Salesforce", "Salesforc");
        assert_eq!(s, (s * 1000.0).round() / 1000.0);
        assert!((0.0..=1.0).contains(&s));
    }

    #[test]
    fn empty_names_never_match() {
        assert_eq!(similarity("", "Gaza"), 0.0);
        assert_eq!(similarity("--", "Gaza"), 0.0);
    }
}
