//! Deterministic pseudonymous row identifiers.

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE;
use sha2::{Digest, Sha256};

use table_enrich_shared::Row;

/// Default number of encoded characters kept from the digest.
pub const DEFAULT_ID_LENGTH: usize = 16;

/// Derive an ID from the selected fields of `row` and a seed.
///
/// The non-empty values of `fields` are concatenated in the given order,
/// followed by `seed`, hashed with SHA-256, encoded as URL-safe base64 and
/// truncated to `length` characters (at most 44). Rows with identical
/// selected values get identical IDs.
pub fn generate_unique_id(
    row: &Row,
    seed: &str,
    fields: &[String],
    prefix: &str,
    length: usize,
) -> String {
    let mut hasher = Sha256::new();
    for field in fields {
        if let Some(value) = row.value(field) {
            hasher.update(value.as_bytes());
        }
    }
    hasher.update(seed.as_bytes());

    let encoded = URL_SAFE.encode(hasher.finalize());
    let cut = length.min(encoded.len());
    format!("{prefix}{}", &encoded[..cut])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn matches_known_digest() {
        // sha256("abc"), URL-safe base64.
        let row = Row::from_pairs([("First", "a"), ("Last", "b")]);
        let id = generate_unique_id(&row, "c", &fields(&["First", "Last"]), "", 16);
        assert_eq!(id, "ungWv48Bz-pBQUDe");
    }

    #[test]
    fn empty_values_are_skipped() {
        let row = Row::from_pairs([("First", ""), ("Last", "")]);
        let id = generate_unique_id(&row, "", &fields(&["First", "Last", "Absent"]), "CON", 16);
        // sha256("")
        assert_eq!(id, "CON47DEQpj8HBSa-_TI");
    }

    #[test]
    fn deterministic_and_order_sensitive() {
        let row = Row::from_pairs([("Email", "ada@example.com"), ("Name", "Ada")]);
        let f = fields(&["Email", "Name"]);
        assert_eq!(
            generate_unique_id(&row, "s1", &f, "C-", 12),
            generate_unique_id(&row.clone(), "s1", &f, "C-", 12)
        );
        assert_ne!(
            generate_unique_id(&row, "s1", &f, "", 16),
            generate_unique_id(&row, "s1", &fields(&["Name", "Email"]), "", 16)
        );
        assert_ne!(
            generate_unique_id(&row, "s1", &f, "", 16),
            generate_unique_id(&row, "s2", &f, "", 16)
        );
    }

    #[test]
    fn length_is_clamped_to_digest() {
        let row = Row::from_pairs([("Name", "Ada")]);
        let f = fields(&["Name"]);
        assert_eq!(generate_unique_id(&row, "", &f, "", 8).len(), 8);
        assert_eq!(generate_unique_id(&row, "", &f, "", 500).len(), 44);
        assert_eq!(generate_unique_id(&row, "", &f, "P", 0), "P");
    }
}
