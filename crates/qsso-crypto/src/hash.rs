use sha1::Sha1;
use sha2::{Digest, Sha256};

pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut h = Sha256::new();
    h.update(data);
    let out = h.finalize();
    let mut arr = [0u8; 32];
    arr.copy_from_slice(&out);
    arr
}

/// Lowercase hex SHA-1, the digest the SSO cache uses for file names.
pub fn sha1_hex(data: &[u8]) -> String {
    let mut h = Sha1::new();
    h.update(data);
    hex::encode(h.finalize())
}

/// Lowercase hex SHA-256 over several chunks fed in order.
pub fn sha256_hex_chunks<I, T>(chunks: I) -> String
where
    I: IntoIterator<Item = T>,
    T: AsRef<[u8]>,
{
    let mut h = Sha256::new();
    for chunk in chunks {
        h.update(chunk.as_ref());
    }
    hex::encode(h.finalize())
}
