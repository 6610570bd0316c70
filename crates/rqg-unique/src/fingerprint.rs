//! Query normalization and fingerprinting.

use xxhash_rust::xxh3::xxh3_128;

/// Controls how a query is normalized before hashing.
#[derive(Debug, Clone, Copy)]
pub struct NormalizeOptions {
    /// Collapse runs of whitespace to a single space and trim.
    pub collapse_whitespace: bool,
    /// Uppercase the text so keyword casing does not split fingerprints.
    pub uppercase: bool,
    /// Replace string and numeric literals with placeholders.
    pub mask_literals: bool,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self {
            collapse_whitespace: true,
            uppercase: true,
            mask_literals: false,
        }
    }
}

/// 128-bit fingerprint of a query under the default normalization.
pub fn fingerprint(query: &str) -> u128 {
    fingerprint_with(query, NormalizeOptions::default())
}

/// 128-bit fingerprint under explicit normalization options.
pub fn fingerprint_with(query: &str, options: NormalizeOptions) -> u128 {
    xxh3_128(normalize(query, options).as_bytes())
}

/// The literal-masked "shape" of a query: string literals become `'?'`,
/// numbers become `?`, whitespace collapses. Two queries with the same
/// shape differ only in their literals.
pub fn query_shape(query: &str) -> String {
    normalize(
        query,
        NormalizeOptions {
            collapse_whitespace: true,
            uppercase: false,
            mask_literals: true,
        },
    )
}

fn normalize(query: &str, options: NormalizeOptions) -> String {
    let mut out = String::with_capacity(query.len());
    let mut chars = query.chars().peekable();
    let mut pending_space = false;
    let mut prev: Option<char> = None;
    while let Some(c) = chars.next() {
        if options.collapse_whitespace && c.is_whitespace() {
            pending_space = !out.is_empty();
            prev = None;
            continue;
        }
        if pending_space {
            out.push(' ');
            pending_space = false;
        }
        if options.mask_literals {
            if c == '\'' {
                // Consume the literal, honoring '' escapes.
                while let Some(inner) = chars.next() {
                    if inner == '\'' {
                        if chars.peek() == Some(&'\'') {
                            chars.next();
                        } else {
                            break;
                        }
                    }
                }
                out.push_str("'?'");
                prev = Some('\'');
                continue;
            }
            // Mask digit runs only at word boundaries so identifiers like
            // `t1` survive.
            let in_word = prev.is_some_and(|p| p.is_alphanumeric() || p == '_');
            if c.is_ascii_digit() && !in_word {
                while let Some(&next) = chars.peek() {
                    if next.is_ascii_digit() || next == '.' {
                        chars.next();
                    } else {
                        break;
                    }
                }
                out.push('?');
                prev = Some('?');
                continue;
            }
        }
        prev = Some(c);
        if options.uppercase {
            for upper in c.to_uppercase() {
                out.push(upper);
            }
        } else {
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_whitespace_and_case_insensitive() {
        assert_eq!(
            fingerprint("select  1\n from t"),
            fingerprint("SELECT 1 FROM T")
        );
        assert_ne!(fingerprint("SELECT 1"), fingerprint("SELECT 2"));
    }

    #[test]
    fn test_shape_masks_literals() {
        assert_eq!(
            query_shape("SELECT * FROM t WHERE a = 17 AND b = 'abc'"),
            "SELECT * FROM t WHERE a = ? AND b = '?'"
        );
        assert_eq!(
            query_shape("SELECT * FROM t WHERE a = 42 AND b = 'xyz'"),
            query_shape("SELECT * FROM t WHERE a = 17 AND b = 'abc'")
        );
    }

    #[test]
    fn test_shape_keeps_identifiers_with_digits() {
        assert_eq!(
            query_shape("SELECT c1 FROM t1 WHERE c1 = 10"),
            "SELECT c1 FROM t1 WHERE c1 = ?"
        );
    }

    #[test]
    fn test_shape_handles_escaped_quotes() {
        assert_eq!(
            query_shape("SELECT 'it''s', 3.14"),
            "SELECT '?', ?"
        );
    }

    #[test]
    fn test_masked_fingerprints_collide_on_shape() {
        let options = NormalizeOptions {
            mask_literals: true,
            ..NormalizeOptions::default()
        };
        assert_eq!(
            fingerprint_with("SELECT 1", options),
            fingerprint_with("SELECT 999", options)
        );
    }
}
