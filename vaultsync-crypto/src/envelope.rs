//! Passphrase-based, versioned encryption envelope.
//!
//! Layout (all integers big-endian):
//!
//! ```text
//! [version: u8][memory_cost: u32][time_cost: u32][parallelism: u8][salt: 16][nonce: 12][ciphertext + tag]
//! ```
//!
//! Every parameter needed to re-derive the key travels with the ciphertext,
//! so the iteration count can change between writes (fixed or dynamic
//! mode) without breaking older payloads.

use crate::cipher::{self, SealedBox};
use crate::error::{CryptoError, CryptoResult};
use crate::key::{
    derive_key, DerivedKey, IterationMode, KdfParams, Salt, MAX_PARALLELISM, SALT_SIZE,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use zeroize::Zeroizing;

/// Current envelope format version.
pub const ENVELOPE_VERSION: u8 = 1;

const HEADER_LEN: usize = 1 + 4 + 4 + 1 + SALT_SIZE;

/// Fixed plaintext sealed into the remote passphrase verifier.
const VERIFIER_PLAINTEXT: &[u8] = b"vaultsync-passphrase-verifier";
const VERIFIER_AAD: &[u8] = b"verifier";

/// Encrypts and decrypts payloads with keys derived from one passphrase.
///
/// Derived keys are cached per `(salt, params)` because Argon2 is
/// deliberately slow; new payloads reuse the instance salt so steady-state
/// encryption never re-derives.
pub struct PassphraseCipher {
    passphrase: Zeroizing<String>,
    base_params: KdfParams,
    mode: IterationMode,
    salt: Salt,
    keys: Mutex<HashMap<(Salt, KdfParams), DerivedKey>>,
}

impl std::fmt::Debug for PassphraseCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PassphraseCipher")
            .field("passphrase", &"[REDACTED]")
            .field("base_params", &self.base_params)
            .field("mode", &self.mode)
            .finish()
    }
}

impl PassphraseCipher {
    /// Creates a cipher for `passphrase`. Empty passphrases are rejected.
    pub fn new(passphrase: &str, base_params: KdfParams, mode: IterationMode) -> CryptoResult<Self> {
        if passphrase.is_empty() {
            return Err(CryptoError::EmptyPassphrase);
        }
        Ok(Self {
            passphrase: Zeroizing::new(passphrase.to_string()),
            base_params,
            mode,
            salt: Salt::random(),
            keys: Mutex::new(HashMap::new()),
        })
    }

    /// Derives the key used for a payload of `len` bytes ahead of time.
    /// CPU-bound; callers on an async runtime should run it off the
    /// reactor threads.
    pub fn warm_up(&self, len: usize) -> CryptoResult<()> {
        let params = self.params_for(len);
        self.key_for(&self.salt, &params).map(|_| ())
    }

    /// Encrypts `plaintext`, picking the iteration count from the
    /// configured [`IterationMode`].
    pub fn encrypt(&self, plaintext: &[u8], aad: &[u8]) -> CryptoResult<Vec<u8>> {
        let params = self.params_for(plaintext.len());
        self.encrypt_with_params(plaintext, aad, params)
    }

    /// Encrypts `plaintext` with an explicit iteration count.
    pub fn encrypt_with_iterations(
        &self,
        plaintext: &[u8],
        aad: &[u8],
        iterations: u32,
    ) -> CryptoResult<Vec<u8>> {
        self.encrypt_with_params(plaintext, aad, self.base_params.with_time_cost(iterations))
    }

    fn encrypt_with_params(
        &self,
        plaintext: &[u8],
        aad: &[u8],
        params: KdfParams,
    ) -> CryptoResult<Vec<u8>> {
        let key = self.key_for(&self.salt, &params)?;
        let sealed = cipher::seal(&key, plaintext, aad)?;
        Ok(write_envelope(&params, &self.salt, &sealed))
    }

    /// Decrypts an envelope produced by any cipher holding the same
    /// passphrase.
    pub fn decrypt(&self, data: &[u8], aad: &[u8]) -> CryptoResult<Vec<u8>> {
        let (params, salt, sealed) = read_envelope(data)?;
        let key = self.key_for(&salt, &params)?;
        cipher::open(&key, &sealed, aad)
    }

    /// Encrypts a string into base64 text.
    pub fn encrypt_string(&self, plaintext: &str, aad: &[u8]) -> CryptoResult<String> {
        Ok(STANDARD.encode(self.encrypt(plaintext.as_bytes(), aad)?))
    }

    /// Decrypts base64 text produced by [`Self::encrypt_string`].
    pub fn decrypt_string(&self, encoded: &str, aad: &[u8]) -> CryptoResult<String> {
        let bytes = STANDARD
            .decode(encoded)
            .map_err(|e| CryptoError::Malformed(format!("invalid base64: {e}")))?;
        let plaintext = self.decrypt(&bytes, aad)?;
        String::from_utf8(plaintext)
            .map_err(|e| CryptoError::Malformed(format!("invalid UTF-8: {e}")))
    }

    /// Produces a verifier record that lets other devices check their
    /// passphrase before touching any data.
    pub fn make_verifier(&self) -> CryptoResult<String> {
        Ok(STANDARD.encode(self.encrypt(VERIFIER_PLAINTEXT, VERIFIER_AAD)?))
    }

    /// Returns true if this cipher's passphrase opens `verifier`.
    pub fn test_passphrase(&self, verifier: &str) -> bool {
        let Ok(bytes) = STANDARD.decode(verifier) else {
            return false;
        };
        matches!(self.decrypt(&bytes, VERIFIER_AAD), Ok(p) if p == VERIFIER_PLAINTEXT)
    }

    fn params_for(&self, len: usize) -> KdfParams {
        self.base_params
            .with_time_cost(self.mode.iterations_for(len))
    }

    fn key_for(&self, salt: &Salt, params: &KdfParams) -> CryptoResult<DerivedKey> {
        if let Some(key) = self
            .keys
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(*salt, *params))
        {
            return Ok(key.clone());
        }
        let key = derive_key(&self.passphrase, salt, params)?;
        self.keys
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((*salt, *params), key.clone());
        Ok(key)
    }
}

/// One-shot encryption with an explicit iteration count.
pub fn encrypt_with_passphrase(
    plaintext: &[u8],
    passphrase: &str,
    params: &KdfParams,
) -> CryptoResult<Vec<u8>> {
    PassphraseCipher::new(
        passphrase,
        *params,
        IterationMode::Fixed {
            iterations: params.time_cost,
        },
    )?
    .encrypt(plaintext, &[])
}

/// One-shot decryption of an envelope without associated data.
pub fn decrypt_with_passphrase(ciphertext: &[u8], passphrase: &str) -> CryptoResult<Vec<u8>> {
    let (params, salt, sealed) = read_envelope(ciphertext)?;
    if passphrase.is_empty() {
        return Err(CryptoError::EmptyPassphrase);
    }
    let key = derive_key(passphrase, &salt, &params)?;
    cipher::open(&key, &sealed, &[])
}

/// Returns the envelope version byte, if `data` looks like an envelope.
pub fn envelope_version(data: &[u8]) -> Option<u8> {
    data.first().copied()
}

fn write_envelope(params: &KdfParams, salt: &Salt, sealed: &SealedBox) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + sealed.len());
    out.push(ENVELOPE_VERSION);
    out.extend_from_slice(&params.memory_cost.to_be_bytes());
    out.extend_from_slice(&params.time_cost.to_be_bytes());
    out.push(params.parallelism.min(MAX_PARALLELISM) as u8);
    out.extend_from_slice(salt.as_bytes());
    out.extend_from_slice(&sealed.to_bytes());
    out
}

fn read_envelope(data: &[u8]) -> CryptoResult<(KdfParams, Salt, SealedBox)> {
    let version = *data
        .first()
        .ok_or_else(|| CryptoError::Malformed("empty envelope".to_string()))?;
    if version != ENVELOPE_VERSION {
        return Err(CryptoError::UnsupportedVersion(version));
    }
    if data.len() < HEADER_LEN {
        return Err(CryptoError::Malformed(format!(
            "envelope header truncated: {} bytes",
            data.len()
        )));
    }

    let read_u32 = |at: usize| {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(&data[at..at + 4]);
        u32::from_be_bytes(buf)
    };
    let params = KdfParams {
        memory_cost: read_u32(1),
        time_cost: read_u32(5),
        parallelism: data[9] as u32,
    };
    // The header comes from the remote; never hand unbounded costs to Argon2.
    params
        .validate()
        .map_err(|e| CryptoError::Malformed(format!("envelope header: {e}")))?;
    let mut salt = [0u8; SALT_SIZE];
    salt.copy_from_slice(&data[10..HEADER_LEN]);
    let sealed = SealedBox::from_bytes(&data[HEADER_LEN..])?;
    Ok((params, Salt::from_bytes(salt), sealed))
}
