use sha2::{Digest, Sha256};

/// Compute the SHA-256 of a byte slice, returning the lowercase hex digest.
#[must_use]
pub fn sha256_hex(data: &[u8]) -> String {
    let digest = Sha256::digest(data);
    let mut out = String::with_capacity(64);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// Compute the BLAKE3 hash of a byte slice, returning the hex-encoded digest.
#[must_use]
pub fn blake3_bytes(data: &[u8]) -> String {
    blake3::hash(data).to_hex().to_string()
}

/// Weak ETag for an in-memory body: length plus a blake3 prefix.
#[must_use]
pub fn weak_etag_bytes(data: &[u8]) -> String {
    let hash = blake3_bytes(data);
    format!("W/\"{:x}-{}\"", data.len(), &hash[..16])
}

/// Weak ETag for a file known only by its size and modification time.
#[must_use]
pub fn weak_etag_stat(len: u64, mtime_ms: u128) -> String {
    format!("W/\"{len:x}-{mtime_ms:x}\"")
}
