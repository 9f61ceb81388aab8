//! Content fingerprinting
//!
//! A fingerprint is a blake3 hash of a note's body with the generated
//! front-matter header stripped, so header-only rewrites never register
//! as user edits. Deterministic, no I/O.

use minutes_vault::note::strip_header;

/// Fingerprint a note's meaningful content.
pub fn fingerprint(text: &str) -> String {
    blake3::hash(strip_header(text).as_bytes())
        .to_hex()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deterministic() {
        assert_eq!(fingerprint("# Note\nbody"), fingerprint("# Note\nbody"));
        assert_ne!(fingerprint("# Note\nbody"), fingerprint("# Note\nbody!"));
    }

    #[test]
    fn test_header_rewrite_is_a_noop() {
        let a = "---\nminutes-id: x\nminutes-updated: 2026-01-01T00:00:00Z\n---\n\n# Note\nbody";
        let b = "---\nminutes-id: x\nminutes-updated: 2026-02-02T00:00:00Z\n---\n\n# Note\nbody";
        assert_eq!(fingerprint(a), fingerprint(b));
    }

    #[test]
    fn test_body_edit_changes_fingerprint() {
        let a = "---\nminutes-id: x\n---\n\n# Note\nbody";
        let b = "---\nminutes-id: x\n---\n\n# Note\nbody edited";
        assert_ne!(fingerprint(a), fingerprint(b));
    }

    #[test]
    fn test_headerless_text_hashes_whole_body() {
        assert_eq!(fingerprint("plain"), fingerprint("plain"));
    }
}
