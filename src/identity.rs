//! Content-addressed identifiers for sources and items.
//!
//! Sources are keyed by their feed URL and items by their permanent link.
//! Because the identifier depends only on that string, re-polling a feed
//! produces the same ids again and the store's primary key turns repeated
//! discoveries into no-ops.

use sha2::{Digest, Sha256};

/// Number of hex characters kept from the digest (96 bits).
pub const ID_LEN: usize = 24;

/// Derives the stable identifier for a feed URL or an item link.
///
/// # Examples
///
/// ```
/// use feedvault::identity::{identifier_for, ID_LEN};
///
/// let id = identifier_for("https://example.com/feed.xml");
/// assert_eq!(id.len(), ID_LEN);
/// assert_eq!(id, identifier_for("https://example.com/feed.xml"));
/// ```
pub fn identifier_for(input: &str) -> String {
    let hash = Sha256::digest(input.as_bytes());
    let mut hex = format!("{:x}", hash);
    hex.truncate(ID_LEN);
    hex
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_known_digest_prefix() {
        // sha256("") = e3b0c44298fc1c149afbf4c8996fb924...
        assert_eq!(identifier_for(""), "e3b0c44298fc1c149afbf4c8");
    }

    #[test]
    fn test_lowercase_hex_only() {
        let id = identifier_for("https://www.youtube.com/feeds/videos.xml?channel_id=UC123");
        assert!(id
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
    }

    #[test]
    fn test_distinct_links_distinct_ids() {
        let a = identifier_for("https://example.com/watch?v=1");
        let b = identifier_for("https://example.com/watch?v=2");
        assert_ne!(a, b);
    }

    proptest! {
        #[test]
        fn prop_fixed_length(input in ".*") {
            prop_assert_eq!(identifier_for(&input).len(), ID_LEN);
        }

        #[test]
        fn prop_deterministic(input in ".*") {
            prop_assert_eq!(identifier_for(&input), identifier_for(&input));
        }

        #[test]
        fn prop_different_urls_differ(a in "https://[a-z]{1,12}\\.com/[a-z0-9]{0,16}",
                                      b in "https://[a-z]{1,12}\\.com/[a-z0-9]{0,16}") {
            prop_assume!(a != b);
            prop_assert_ne!(identifier_for(&a), identifier_for(&b));
        }
    }
}
