//! Server-side nonce issuance and validation with expiry.
//!
//! Grounded on `original_source/src/wss_server_impl.h`'s nonce-pool member;
//! the original keeps a map of issued nonces with issuance timestamps and a
//! fixed TTL, which this mirrors directly.

use std::collections::HashMap;
use std::time::Duration;

use time::OffsetDateTime;

const DEFAULT_TTL: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Validation {
    /// Present in the pool, issued within the TTL: this exact nonce validates once.
    Valid,
    /// Not present at all (never issued, or already consumed).
    Unknown,
    /// Present but past its TTL: trigger a re-challenge with `stale=true`.
    Stale,
}

/// Mints and one-shot-validates Digest nonces. Scoped per server instance, not global.
pub struct NoncePool {
    issued: HashMap<String, OffsetDateTime>,
    ttl: Duration,
}

impl NoncePool {
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        NoncePool {
            issued: HashMap::new(),
            ttl,
        }
    }

    /// Mint a fresh nonce and record its issuance time.
    pub fn mint(&mut self) -> String {
        use rand::RngCore;
        let mut bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut bytes);
        let nonce = hex::encode(bytes);
        self.issued.insert(nonce.clone(), OffsetDateTime::now_utc());
        nonce
    }

    /// Validate and consume a nonce: it validates at most once within its TTL.
    pub fn validate(&mut self, nonce: &str) -> Validation {
        let Some(issued_at) = self.issued.remove(nonce) else {
            return Validation::Unknown;
        };
        let age = OffsetDateTime::now_utc() - issued_at;
        if age.whole_seconds() as u64 <= self.ttl.as_secs() {
            Validation::Valid
        } else {
            Validation::Stale
        }
    }

    /// Drop every nonce past its TTL without consuming the still-live ones.
    pub fn sweep(&mut self) {
        let ttl = self.ttl;
        let now = OffsetDateTime::now_utc();
        self.issued
            .retain(|_, issued_at| (now - *issued_at).whole_seconds() as u64 <= ttl.as_secs());
    }
}

impl Default for NoncePool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn mint_then_validate_succeeds_once() {
        let mut pool = NoncePool::new();
        let nonce = pool.mint();
        assert_eq!(pool.validate(&nonce), Validation::Valid);
        assert_eq!(pool.validate(&nonce), Validation::Unknown);
    }

    #[test]
    fn expired_nonce_is_stale() {
        let mut pool = NoncePool::with_ttl(Duration::from_secs(0));
        let nonce = pool.mint();
        std::thread::sleep(Duration::from_millis(10));
        assert_eq!(pool.validate(&nonce), Validation::Stale);
    }

    #[test]
    fn sweep_evicts_expired_without_consuming_live() {
        let mut pool = NoncePool::with_ttl(Duration::from_secs(0));
        let expired = pool.mint();
        std::thread::sleep(Duration::from_millis(10));
        pool.sweep();
        assert_eq!(pool.validate(&expired), Validation::Unknown);
    }
}
