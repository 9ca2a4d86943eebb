//! WS request/response context surfaces (spec §6): path, query, headers, and
//! the optional Basic/Digest credential block a client attaches to its
//! upgrade request.

use crate::auth::Scheme as AuthScheme;

/// What the client sends: request target pieces plus an optional credential.
#[derive(Debug, Clone, Default)]
pub struct WsRequestContext {
    pub path: String,
    pub query: String,
    pub headers: Vec<(String, String)>,
    pub authenticate: Option<WsAuthenticate>,
}

impl WsRequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        crate::util::header_lookup(&self.headers, name)
    }
}

#[derive(Debug, Clone)]
pub struct WsAuthenticate {
    pub scheme: AuthScheme,
    pub username: String,
    pub password: String,
}

/// What the server sent back: captured after the upgrade completes (or fails
/// with a challenge) so the application can inspect status/headers.
#[derive(Debug, Clone, Default)]
pub struct WsResponseContext {
    pub status: u16,
    pub headers: Vec<(String, String)>,
}

impl WsResponseContext {
    pub fn header(&self, name: &str) -> Option<&str> {
        crate::util::header_lookup(&self.headers, name)
    }
}
