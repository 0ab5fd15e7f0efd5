//! Northbound authentication: a single shared bearer token compared
//! constant-time against the configured value (spec §6). Absent a
//! configured value, authentication is disabled entirely — there is no
//! per-user auth in the core (that lives, if anywhere, in the external
//! configuration UI this repo does not build).

/// Compares `presented` against `expected` in constant time with respect to
/// the compared bytes, to avoid leaking the token's length/prefix through
/// response-time side channels.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

/// Checks an inbound `Authorization: Bearer <token>` header value against
/// the configured gateway token. `None` for `configured` disables auth
/// (every request is authenticated).
pub fn check_bearer(configured: Option<&str>, header_value: Option<&str>) -> bool {
    let Some(expected) = configured else {
        return true;
    };
    let Some(presented) = header_value.and_then(|v| v.strip_prefix("Bearer ")) else {
        return false;
    };
    constant_time_eq(presented.trim().as_bytes(), expected.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_when_unconfigured() {
        assert!(check_bearer(None, None));
        assert!(check_bearer(None, Some("Bearer anything")));
    }

    #[test]
    fn accepts_matching_token() {
        assert!(check_bearer(Some("secret"), Some("Bearer secret")));
    }

    #[test]
    fn rejects_missing_or_mismatched_token() {
        assert!(!check_bearer(Some("secret"), None));
        assert!(!check_bearer(Some("secret"), Some("Bearer wrong")));
        assert!(!check_bearer(Some("secret"), Some("secret")));
    }
}
