macro_rules! ensure {
    ($cond:expr, $err:expr $(,)?) => {
        if !$cond {
            return std::result::Result::Err($err.into());
        }
    };
}

macro_rules! bail {
    ($err:expr $(,)?) => {{
        return std::result::Result::Err($err.into());
    }};
}

pub(crate) use bail;
pub(crate) use ensure;

pub async fn sleep(duration: std::time::Duration) {
    async_std::task::sleep(duration).await
}

pub async fn timeout<F, T>(
    duration: std::time::Duration,
    future: F,
) -> Result<T, async_std::future::TimeoutError>
where
    F: std::future::Future<Output = T>,
{
    async_std::future::timeout(duration, future).await
}

/// Case-insensitive header lookup over a `Vec<(String, String)>`-shaped header list, matching
/// the "case-sensitive on wire, case-insensitive on lookup" contract for WS request/response headers.
pub fn header_lookup<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// Prefix `path` with `/` and `query` with `?` if either is present and not already prefixed,
/// building the WS request-line target the way a client Connect() call does.
pub fn build_ws_target(path: &str, query: &str) -> String {
    let mut target = String::new();
    if path.is_empty() {
        target.push('/');
    } else if path.starts_with('/') {
        target.push_str(path);
    } else {
        target.push('/');
        target.push_str(path);
    }
    if !query.is_empty() {
        if query.starts_with('?') {
            target.push_str(query);
        } else {
            target.push('?');
            target.push_str(query);
        }
    }
    target
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn build_ws_target_prefixes_both() {
        assert_eq!(build_ws_target("", ""), "/");
        assert_eq!(build_ws_target("rpc", "a=1"), "/rpc?a=1");
        assert_eq!(build_ws_target("/rpc", "?a=1"), "/rpc?a=1");
    }

    #[test]
    fn header_lookup_is_case_insensitive() {
        let headers = vec![("WWW-Authenticate".to_string(), "Digest".to_string())];
        assert_eq!(header_lookup(&headers, "www-authenticate"), Some("Digest"));
        assert_eq!(header_lookup(&headers, "X-Missing"), None);
    }
}
