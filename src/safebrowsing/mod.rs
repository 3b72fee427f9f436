//! URL-safety oracle
//!
//! Canonicalize → hash → prefix lookup against the Safe Browsing v5 API,
//! with responses cached under the hash-prefix key.

use async_trait::async_trait;

pub mod canonicalize;
mod client;
pub mod proto;

pub use client::{SafeBrowsing, Verdict};

/// Seam for the create path: is this destination listed as malicious?
#[async_trait]
pub trait SafetyOracle: Send + Sync {
    async fn check(&self, raw_url: &str) -> crate::errors::Result<Verdict>;
}

#[async_trait]
impl SafetyOracle for SafeBrowsing {
    async fn check(&self, raw_url: &str) -> crate::errors::Result<Verdict> {
        SafeBrowsing::check(self, raw_url).await
    }
}
