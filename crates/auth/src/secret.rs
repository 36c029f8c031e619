//! Comparison of shared secrets.

/// Compare two secrets without short-circuiting on the first differing byte.
///
/// Every byte of the longer input is visited, so the running time depends on
/// the input lengths only, never on where they differ.
pub fn secrets_match(provided: &[u8], expected: &[u8]) -> bool {
    let len = provided.len().max(expected.len());
    let mut diff = u8::from(provided.len() != expected.len());
    for i in 0..len {
        let a = provided.get(i).copied().unwrap_or(0);
        let b = expected.get(i).copied().unwrap_or(0);
        diff |= core::hint::black_box(a ^ b);
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_secrets_match() {
        assert!(secrets_match(b"dev-admin-key", b"dev-admin-key"));
        assert!(secrets_match(b"", b""));
    }

    #[test]
    fn any_difference_fails() {
        assert!(!secrets_match(b"dev-admin-kez", b"dev-admin-key"));
        assert!(!secrets_match(b"Xev-admin-key", b"dev-admin-key"));
    }

    #[test]
    fn prefixes_and_zero_padding_do_not_match() {
        assert!(!secrets_match(b"dev", b"dev-admin-key"));
        assert!(!secrets_match(b"dev-admin-key", b"dev"));
        assert!(!secrets_match(b"key\0", b"key"));
        assert!(!secrets_match(b"", b"key"));
    }
}
