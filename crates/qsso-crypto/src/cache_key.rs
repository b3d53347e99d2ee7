//! Content-addressed file names inside the SSO cache directory.
//!
//! Token files are named by the SHA-1 of the URI-encoded cache key. Client
//! registrations come in two generations: the legacy per-extension name and
//! the identity server's name, which hashes `{region, startUrl, tool}`.

use std::path::{Path, PathBuf};

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::Serialize;

use crate::hash::{sha1_hex, sha256_hex_chunks};

/// Characters left untouched by JavaScript's `encodeURI`.
const ENCODE_URI: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b';')
    .remove(b',')
    .remove(b'/')
    .remove(b'?')
    .remove(b':')
    .remove(b'@')
    .remove(b'&')
    .remove(b'=')
    .remove(b'+')
    .remove(b'$')
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')')
    .remove(b'#');

const LEGACY_REGISTRATION_PREFIX: &str = "aws-toolkit-vscode-client-id";

pub fn encode_uri(input: &str) -> String {
    utf8_percent_encode(input, ENCODE_URI).to_string()
}

/// Token cache file for a connection id or profile name.
pub fn token_cache_file(cache_dir: &Path, key: &str) -> PathBuf {
    let digest = sha1_hex(encode_uri(key).as_bytes());
    cache_dir.join(format!("{}.json", digest))
}

/// Registration cache file written by the extension before the identity
/// server owned the cache.
pub fn legacy_registration_cache_file(
    cache_dir: &Path,
    start_url: &str,
    region: &str,
    scopes: &[String],
) -> PathBuf {
    let name = if scopes.is_empty() {
        format!("{}-{}.json", LEGACY_REGISTRATION_PREFIX, region)
    } else {
        let digest = sha256_hex_chunks(
            std::iter::once(start_url).chain(scopes.iter().map(String::as_str)),
        );
        format!("{}-{}-{}.json", LEGACY_REGISTRATION_PREFIX, region, digest)
    };
    cache_dir.join(name)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RegistrationIdentity<'a> {
    region: &'a str,
    start_url: &'a str,
    tool: &'a str,
}

/// Registration cache file as named by the identity server for `tool`.
pub fn registration_cache_file(cache_dir: &Path, start_url: &str, region: &str, tool: &str) -> PathBuf {
    let identity = RegistrationIdentity {
        region,
        start_url,
        tool,
    };
    // Serializing three borrowed strings cannot fail.
    let json = serde_json::to_string(&identity).unwrap_or_default();
    cache_dir.join(format!("{}.json", sha1_hex(json.as_bytes())))
}
