// ─── Version Ordering ───
// Dot-separated version comparison used by the catalog for sorting.

use std::cmp::Ordering;

/// Compare two version strings component by component.
///
/// Components that parse as integers on both sides compare numerically.
/// Anything else falls back to a case-insensitive string comparison of that
/// component. Missing trailing components count as `0`, so `1.20` equals
/// `1.20.0`.
pub fn compare_versions(left: &str, right: &str) -> Ordering {
    let left_parts: Vec<&str> = left.trim().split('.').collect();
    let right_parts: Vec<&str> = right.trim().split('.').collect();
    let len = left_parts.len().max(right_parts.len());

    for i in 0..len {
        let l = left_parts.get(i).copied().unwrap_or("0");
        let r = right_parts.get(i).copied().unwrap_or("0");

        let ordering = match (l.parse::<u64>(), r.parse::<u64>()) {
            (Ok(a), Ok(b)) => a.cmp(&b),
            _ => l.to_ascii_lowercase().cmp(&r.to_ascii_lowercase()),
        };

        if ordering != Ordering::Equal {
            return ordering;
        }
    }

    Ordering::Equal
}

/// Whether `raw` looks like a version token we accept in a file name.
///
/// Must start with a digit and contain only ASCII alphanumerics and dots.
pub(crate) fn is_version_token(raw: &str) -> bool {
    raw.chars().next().is_some_and(|c| c.is_ascii_digit())
        && raw.chars().all(|c| c.is_ascii_alphanumeric() || c == '.')
        && !raw.ends_with('.')
        && !raw.contains("..")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_components_compare_by_value() {
        assert_eq!(compare_versions("1.20.1", "1.20.2"), Ordering::Less);
        assert_eq!(compare_versions("1.20.2", "1.21.0"), Ordering::Less);
        assert_eq!(compare_versions("1.9", "1.10"), Ordering::Less);
        assert_eq!(compare_versions("1.21", "1.20.6"), Ordering::Greater);
    }

    #[test]
    fn missing_components_are_zero_padded() {
        assert_eq!(compare_versions("1.20", "1.20.0"), Ordering::Equal);
        assert_eq!(compare_versions("1.20", "1.20.1"), Ordering::Less);
    }

    #[test]
    fn non_numeric_components_fall_back_to_case_insensitive_text() {
        assert_eq!(compare_versions("1.20.pre1", "1.20.PRE1"), Ordering::Equal);
        assert_eq!(compare_versions("1.20.pre1", "1.20.pre2"), Ordering::Less);
        assert_eq!(compare_versions("24w14a", "24w14b"), Ordering::Less);
    }

    #[test]
    fn version_tokens() {
        assert!(is_version_token("1.20.1"));
        assert!(is_version_token("24w14a"));
        assert!(!is_version_token("v1.20"));
        assert!(!is_version_token("1.20."));
        assert!(!is_version_token("1..2"));
        assert!(!is_version_token(""));
    }
}
