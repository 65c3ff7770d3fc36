use axum::body::Body;
use futures_util::{StreamExt, TryStreamExt};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// SHA-256 of the request body bytes that were actually read.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct BodySha256(pub [u8; 32]);

impl BodySha256 {
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for BodySha256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for BodySha256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BodySha256({})", self.to_hex())
    }
}

/// Running digest shared between a tapped body and whoever needs the result.
#[derive(Clone, Default)]
pub struct BodyDigest {
    hasher: Arc<Mutex<Sha256>>,
    bytes: Arc<AtomicU64>,
}

impl BodyDigest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&self, chunk: &[u8]) {
        self.hasher.lock().update(chunk);
        self.bytes.fetch_add(chunk.len() as u64, Ordering::Relaxed);
    }

    /// Digest of everything fed so far. Later chunks keep accumulating.
    pub fn snapshot(&self) -> BodySha256 {
        let hasher = self.hasher.lock().clone();
        BodySha256(hasher.finalize().into())
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }
}

/// Wrap `body` so each chunk is hashed as the consumer polls it.
///
/// Nothing is buffered; bytes the consumer never reads never reach the digest.
pub fn tap_body(body: Body) -> (Body, BodyDigest) {
    let digest = BodyDigest::new();
    let sink = digest.clone();
    let stream = body
        .into_data_stream()
        .inspect_ok(move |chunk| sink.update(chunk));
    (Body::from_stream(stream), digest)
}

/// Drain `body` completely and return its digest.
pub async fn digest_body(body: Body) -> Result<BodySha256, axum::Error> {
    let digest = BodyDigest::new();
    let mut stream = body.into_data_stream();
    while let Some(chunk) = stream.next().await {
        digest.update(&chunk?);
    }
    Ok(digest.snapshot())
}
