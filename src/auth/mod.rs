//! HTTP Basic/Digest challenge-response for the WebSocket upgrade handshake.
//!
//! Grounded on `original_source/src/wss_socket_impl.cpp`'s `AuthenticateContext`
//! rebuild-on-challenge logic, translated from the C++ struct into an
//! immutable-rebuild value type: each new `WWW-Authenticate` produces a fresh
//! `AuthenticateContext`, carrying `nc` forward from the prior one.

pub mod digest;
pub mod nonce;

pub use nonce::NoncePool;

/// The `nc` wrap-guard ceiling from the original source: once the carried
/// counter exceeds this, it resets to zero rather than risk an overflow that
/// a 16-bit field in the original implementation couldn't represent.
const NC_WRAP_GUARD: u32 = 0xfffd;

/// The one-shot-retry ceiling: a second 401 after an authenticated retry is a
/// real authentication failure, not another invitation to retry.
pub const RETRY_CEILING: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Scheme {
    #[default]
    Unused,
    Basic,
    Digest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Algorithm {
    #[default]
    Md5,
    Md5Sess,
}

/// Parsed `WWW-Authenticate` state plus the client's own nonce-count bookkeeping.
#[derive(Debug, Clone, Default)]
pub struct AuthenticateContext {
    pub scheme: Scheme,
    pub realm: String,
    pub nonce: String,
    pub opaque: Option<String>,
    pub qop: Option<String>,
    pub algorithm: Algorithm,
    pub cnonce: String,
    pub nc: u32,
    pub stale: bool,
}

impl AuthenticateContext {
    /// Parse a `WWW-Authenticate` header value, carrying `nc` forward from `prior`
    /// (if any) through the wrap-guard before incrementing for this retry.
    pub fn parse(header: &str, prior: Option<&AuthenticateContext>) -> Option<Self> {
        let (scheme_word, rest) = header.trim().split_once(char::is_whitespace)?;
        let scheme = match scheme_word.to_ascii_lowercase().as_str() {
            "basic" => Scheme::Basic,
            "digest" => Scheme::Digest,
            _ => return None,
        };

        let params = parse_params(rest);
        let realm = params.get("realm").cloned().unwrap_or_default();

        let carried_nc = match prior {
            Some(p) if p.nc > NC_WRAP_GUARD => 0,
            Some(p) => p.nc,
            None => 0,
        };

        if scheme == Scheme::Basic {
            return Some(AuthenticateContext {
                scheme,
                realm,
                nc: carried_nc + 1,
                ..Default::default()
            });
        }

        let nonce = params.get("nonce").cloned().unwrap_or_default();
        let opaque = params.get("opaque").cloned();
        let qop = params.get("qop").cloned();
        let algorithm = match params.get("algorithm").map(|a| a.to_ascii_uppercase()) {
            Some(ref a) if a == "MD5-SESS" => Algorithm::Md5Sess,
            _ => Algorithm::Md5,
        };
        let stale = matches!(params.get("stale").map(|s| s.to_ascii_lowercase()), Some(ref s) if s == "true");

        Some(AuthenticateContext {
            scheme,
            realm,
            nonce,
            opaque,
            qop,
            algorithm,
            cnonce: digest::new_cnonce(),
            nc: carried_nc + 1,
            stale,
        })
    }

    pub fn should_retry(&self, status: u16) -> bool {
        status == 401 && matches!(self.scheme, Scheme::Digest | Scheme::Basic) && self.nc < RETRY_CEILING
    }
}

/// Server-side: parse a client's `Authorization` header into its scheme and
/// field map, for validating a Basic credential or recomputing a Digest response.
pub fn parse_authorization(header: &str) -> Option<(Scheme, std::collections::HashMap<String, String>)> {
    let (scheme_word, rest) = header.trim().split_once(char::is_whitespace)?;
    match scheme_word.to_ascii_lowercase().as_str() {
        "basic" => Some((Scheme::Basic, std::collections::HashMap::new())),
        "digest" => Some((Scheme::Digest, parse_params(rest))),
        _ => None,
    }
}

/// Split a comma-separated `key=value` / `key="value"` list, as found after the
/// auth-scheme word in a `WWW-Authenticate` or `Authorization` header.
fn parse_params(rest: &str) -> std::collections::HashMap<String, String> {
    let mut map = std::collections::HashMap::new();
    for part in split_unquoted_commas(rest) {
        let Some((key, value)) = part.split_once('=') else {
            continue;
        };
        let key = key.trim().to_ascii_lowercase();
        let value = value.trim().trim_matches('"').to_string();
        map.insert(key, value);
    }
    map
}

fn split_unquoted_commas(s: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut in_quotes = false;
    let mut start = 0;
    for (i, ch) in s.char_indices() {
        match ch {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                parts.push(s[start..i].trim());
                start = i + 1;
            },
            _ => {},
        }
    }
    parts.push(s[start..].trim());
    parts
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parses_digest_challenge() {
        let header = r#"Digest realm="auth", nonce="abc123", qop="auth", opaque="xyz", algorithm=MD5"#;
        let ctx = AuthenticateContext::parse(header, None).unwrap();
        assert_eq!(ctx.scheme, Scheme::Digest);
        assert_eq!(ctx.realm, "auth");
        assert_eq!(ctx.nonce, "abc123");
        assert_eq!(ctx.qop.as_deref(), Some("auth"));
        assert_eq!(ctx.nc, 1);
        assert!(!ctx.stale);
    }

    #[test]
    fn nc_carries_forward_and_wrap_guards() {
        let header = r#"Digest realm="auth", nonce="abc123""#;
        let first = AuthenticateContext::parse(header, None).unwrap();
        assert_eq!(first.nc, 1);

        let second = AuthenticateContext::parse(header, Some(&first)).unwrap();
        assert_eq!(second.nc, 2);

        let mut near_wrap = first.clone();
        near_wrap.nc = 0xfffe;
        let wrapped = AuthenticateContext::parse(header, Some(&near_wrap)).unwrap();
        assert_eq!(wrapped.nc, 1);
    }

    #[test]
    fn should_retry_respects_ceiling() {
        let mut ctx = AuthenticateContext {
            scheme: Scheme::Digest,
            nc: 1,
            ..Default::default()
        };
        assert!(ctx.should_retry(401));
        ctx.nc = 2;
        assert!(!ctx.should_retry(401));
        assert!(!ctx.should_retry(200));
    }
}
