// src/feeds/credential.rs
//! Sealing for private-feed credentials. The value is stored sealed and
//! opened only at fetch time. Keystream derived from a SHA-256 of the
//! master key, a per-seal nonce and a block counter; not authenticated;
//! the value is only ever used as an outbound Authorization header.

use anyhow::{anyhow, Context, Result};
use sha2::{Digest, Sha256};

use crate::store::SealedCredential;

pub const ENV_CREDENTIAL_KEY: &str = "FEED_CREDENTIAL_KEY";

pub fn master_key_from_env() -> Option<String> {
    std::env::var(ENV_CREDENTIAL_KEY).ok().filter(|k| !k.is_empty())
}

fn keystream(master_key: &str, nonce: &[u8], len: usize) -> Vec<u8> {
    let key_digest = Sha256::digest(master_key.as_bytes());
    let mut out = Vec::with_capacity(len);
    let mut counter: u64 = 0;
    while out.len() < len {
        let mut hasher = Sha256::new();
        hasher.update(key_digest);
        hasher.update(nonce);
        hasher.update(counter.to_le_bytes());
        out.extend_from_slice(&hasher.finalize());
        counter += 1;
    }
    out.truncate(len);
    out
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write as _;
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(&mut out, "{b:02x}");
    }
    out
}

fn hex_decode(s: &str) -> Result<Vec<u8>> {
    if s.len() % 2 != 0 {
        return Err(anyhow!("odd-length hex"));
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).context("bad hex digit"))
        .collect()
}

pub fn seal(plain: &str, master_key: &str) -> SealedCredential {
    // Nonce from the clock; uniqueness matters, unpredictability does not.
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let nonce_digest = Sha256::digest(nanos.to_le_bytes());
    let nonce = &nonce_digest[..12];

    let stream = keystream(master_key, nonce, plain.len());
    let cipher: Vec<u8> = plain
        .as_bytes()
        .iter()
        .zip(stream.iter())
        .map(|(p, k)| p ^ k)
        .collect();

    SealedCredential {
        nonce: hex_encode(nonce),
        data: hex_encode(&cipher),
    }
}

pub fn open(sealed: &SealedCredential, master_key: &str) -> Result<String> {
    let nonce = hex_decode(&sealed.nonce).context("credential nonce")?;
    let cipher = hex_decode(&sealed.data).context("credential data")?;
    let stream = keystream(master_key, &nonce, cipher.len());
    let plain: Vec<u8> = cipher
        .iter()
        .zip(stream.iter())
        .map(|(c, k)| c ^ k)
        .collect();
    String::from_utf8(plain).map_err(|_| anyhow!("credential did not decode; wrong key?"))
}
