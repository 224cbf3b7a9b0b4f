//! At-rest representation: a plaintext `PublicData` header wrapping an
//! AEAD-sealed `SecretData` blob, plus the reset/load/store/update pipeline
//! and the monotonic nonce counter that makes reusing an AES-256-GCM key
//! across reboots safe.
//!
//! `SecretData` never touches the wire or the storage medium in the clear;
//! only `PublicData` (and its serialized framing) does.

use heapless_bytes::Bytes;
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::{info, warn};
use crate::collaborators::{Rand, Storage};
use crate::constants::{
    LENGTH_PREFIX_LENGTH, MASTER_SECRET_LENGTH, MAX_PIN_RETRIES, NONCE_LENGTH,
    PERSISTED_BLOB_CAPACITY, PIN_HASH_LENGTH, SALT_LENGTH, SECRET_DATA_CIPHERTEXT_CAPACITY,
    TAG_LENGTH,
};
use crate::error::{Error, Result};
use crate::primitives;

/// `HKDF-SHA256.extract(salt, pin_hash)`, used directly as the AES-256-GCM
/// key for the `SecretData` blob. Callers should wrap the return value in
/// `zeroize::Zeroizing` once they are done threading it through.
pub type StorageKey = [u8; 32];

/// The plaintext metadata header: everything `PublicData` needs outside of
/// the sealed blob.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Meta {
    pub valid: bool,
    #[serde(with = "serde_bytes")]
    pub salt: [u8; SALT_LENGTH],
    #[serde(with = "serde_bytes")]
    pub nonce_ctr: [u8; NONCE_LENGTH],
    pub pin_retries: u8,
}

/// The plaintext header plus the sealed `SecretData` blob, exactly as it is
/// persisted. `c` and `tag` are the AES-256-GCM ciphertext and tag of
/// CBOR(`SecretData`).
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct PublicData {
    pub meta: Meta,
    #[serde(rename = "forcePINChange")]
    pub force_pin_change: Option<bool>,
    pub c: Bytes<SECRET_DATA_CIPHERTEXT_CAPACITY>,
    #[serde(with = "serde_bytes")]
    pub tag: [u8; TAG_LENGTH],
}

/// The contents of the sealed blob: the master secret, PIN hash, PIN length
/// and the global sign counter. Scrubbed on every exit path.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize, Zeroize)]
#[zeroize(drop)]
pub struct SecretData {
    #[serde(with = "serde_bytes")]
    pub master_secret: [u8; MASTER_SECRET_LENGTH],
    #[serde(with = "serde_bytes")]
    pub pin_hash: [u8; PIN_HASH_LENGTH],
    pub pin_length: u8,
    pub sign_ctr: u32,
}

fn pin_hash(pin: &[u8]) -> [u8; PIN_HASH_LENGTH] {
    let digest = primitives::sha256(pin);
    let mut out = [0u8; PIN_HASH_LENGTH];
    out.copy_from_slice(&digest[..PIN_HASH_LENGTH]);
    out
}

fn storage_key(salt: &[u8; SALT_LENGTH], pin_hash: &[u8; PIN_HASH_LENGTH]) -> StorageKey {
    primitives::hkdf_extract(salt, pin_hash)
}

/// Little-endian 96-bit increment-by-one with wraparound, used to advance
/// `nonce_ctr` before every re-seal.
fn increment_nonce(nonce: &mut [u8; NONCE_LENGTH]) {
    for byte in nonce.iter_mut() {
        let (sum, carry) = byte.overflowing_add(1);
        *byte = sum;
        if !carry {
            return;
        }
    }
}

fn cbor_serialize<T: Serialize, const N: usize>(value: &T) -> Result<heapless::Vec<u8, N>> {
    let mut buffer = [0u8; N];
    let writer = serde_cbor::ser::SliceWrite::new(&mut buffer);
    let mut ser = serde_cbor::Serializer::new(writer);
    value.serialize(&mut ser).map_err(|_| Error::Corrupt)?;
    let written = ser.into_inner().bytes_written();
    let mut out = heapless::Vec::<u8, N>::new();
    out.extend_from_slice(&buffer[..written]).map_err(|_| Error::Corrupt)?;
    Ok(out)
}

fn cbor_deserialize<'a, T: Deserialize<'a>>(bytes: &'a [u8]) -> Result<T> {
    serde_cbor::from_slice(bytes).map_err(|_| Error::Corrupt)
}

fn seal_secret(secret: &SecretData, key: &StorageKey, nonce: &[u8; NONCE_LENGTH]) -> Result<(Bytes<SECRET_DATA_CIPHERTEXT_CAPACITY>, [u8; TAG_LENGTH])> {
    let plaintext = cbor_serialize::<_, SECRET_DATA_CIPHERTEXT_CAPACITY>(secret)?;
    let (ct, tag) = primitives::aes256_gcm_seal(key, nonce, b"", &plaintext)?;
    let c = Bytes::from_slice(&ct).map_err(|_| Error::Corrupt)?;
    Ok((c, tag))
}

fn open_secret(pd: &PublicData, key: &StorageKey) -> Result<SecretData> {
    let plaintext = primitives::aes256_gcm_open(key, &pd.meta.nonce_ctr, b"", &pd.c, &pd.tag)?;
    cbor_deserialize(&plaintext)
}

impl PublicData {
    /// First-boot / factory-reset bootstrap: fresh master secret, default
    /// PIN `"candystick"`, fresh salt, `nonce_ctr` seeded from
    /// `now_counter`, `pin_retries` restored to [`MAX_PIN_RETRIES`].
    ///
    /// `force_pin_change` is the policy flag stored alongside the header;
    /// the Design Notes' production posture is `true`, the spec's literal
    /// default-PIN walkthrough is silent on it, so callers decide.
    pub fn reset(
        storage: &mut impl Storage,
        rand: &mut impl Rand,
        now_counter: u32,
        force_pin_change: bool,
    ) -> Result<(Self, SecretData, StorageKey)> {
        let master_secret = rand.bytes32();
        let pin_digest = pin_hash(crate::constants::DEFAULT_PIN);
        let secret = SecretData {
            master_secret,
            pin_hash: pin_digest,
            pin_length: crate::constants::DEFAULT_PIN_LENGTH,
            sign_ctr: 0,
        };

        let salt = rand.bytes32();
        let nonce = now_counter.to_le_bytes();
        let mut nonce_ctr = [0u8; NONCE_LENGTH];
        nonce_ctr[..4].copy_from_slice(&nonce);

        let key = storage_key(&salt, &secret.pin_hash);
        let (c, tag) = seal_secret(&secret, &key, &nonce_ctr)?;

        let pd = PublicData {
            meta: Meta {
                valid: true,
                salt,
                nonce_ctr,
                pin_retries: MAX_PIN_RETRIES,
            },
            force_pin_change: Some(force_pin_change),
            c,
            tag,
        };

        let serialized = pd.serialize()?;
        storage.store(&serialized).map_err(|_| Error::StorageError)?;
        info!("authenticator reset, force_pin_change={}", force_pin_change);

        Ok((pd, secret, key))
    }

    /// Loads and CBOR-decodes the persisted blob. `NotFound` and `Invalid`
    /// both mean the caller must run [`PublicData::reset`].
    pub fn load(storage: &mut impl Storage) -> Result<Self> {
        let bytes = storage.load()?;
        let pd = Self::deserialize(&bytes)?;
        if !pd.meta.valid {
            return Err(Error::Invalid);
        }
        Ok(pd)
    }

    /// Advances `nonce_ctr`, re-seals `secret` under `storage_key` with the
    /// new nonce, and persists. The increment happens before the seal so
    /// the same `(key, nonce)` pair is never reused across two writes.
    pub fn update_secret(
        &mut self,
        storage: &mut impl Storage,
        secret: &SecretData,
        storage_key: &StorageKey,
    ) -> Result<()> {
        let mut next = self.clone();
        increment_nonce(&mut next.meta.nonce_ctr);
        let (c, tag) = seal_secret(secret, storage_key, &next.meta.nonce_ctr)?;
        next.c = c;
        next.tag = tag;

        let serialized = next.serialize()?;
        storage.store(&serialized).map_err(|_| Error::StorageError)?;
        *self = next;
        Ok(())
    }

    /// Decrements `pin_retries` and persists *before* attempting the open,
    /// so a power loss mid-verification still counts the attempt. Fails
    /// fast with [`Error::PinBlocked`] without touching storage if retries
    /// were already exhausted. The same constant-time AEAD-open path runs
    /// whether the PIN is right or wrong: there is no PIN-hash comparison
    /// to short-circuit on.
    pub fn validate_pin(&mut self, storage: &mut impl Storage, pin: &[u8]) -> Result<(SecretData, StorageKey)> {
        if self.meta.pin_retries == 0 {
            warn!("validate_pin called with retries exhausted");
            return Err(Error::PinBlocked);
        }

        let mut attempt = self.clone();
        attempt.meta.pin_retries -= 1;
        let serialized = attempt.serialize()?;
        storage.store(&serialized).map_err(|_| Error::StorageError)?;
        *self = attempt;

        let candidate_hash = pin_hash(pin);
        let key = storage_key(&self.meta.salt, &candidate_hash);

        match open_secret(self, &key) {
            Ok(secret) => {
                self.meta.pin_retries = MAX_PIN_RETRIES;
                self.update_secret(storage, &secret, &key)?;
                info!("PIN validated, retries restored");
                Ok((secret, key))
            }
            Err(_) => {
                info!("PIN did not validate, {} retries remain", self.meta.pin_retries);
                Err(Error::PinInvalid)
            }
        }
    }

    /// `[u32_le length][CBOR]`. The length prefix lets a recovery tool find
    /// the blob's extent on raw flash without a filesystem.
    pub fn serialize(&self) -> Result<heapless_bytes::Bytes<PERSISTED_BLOB_CAPACITY>> {
        let cbor = cbor_serialize::<_, PERSISTED_BLOB_CAPACITY>(self)?;
        let len = cbor.len() as u32;
        let mut out = heapless::Vec::<u8, PERSISTED_BLOB_CAPACITY>::new();
        out.extend_from_slice(&len.to_le_bytes()).map_err(|_| Error::Corrupt)?;
        out.extend_from_slice(&cbor).map_err(|_| Error::Corrupt)?;
        heapless_bytes::Bytes::from_slice(&out).map_err(|_| Error::Corrupt)
    }

    /// Tolerates either `[u32_le length][CBOR]` or bare CBOR: if the first
    /// byte is already a major-type-5 (map) marker in `0xA0..=0xBF`, the
    /// blob has no length prefix and is decoded from offset 0; otherwise
    /// the first four bytes are consumed as the length prefix.
    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        if bytes.is_empty() {
            return Err(Error::Corrupt);
        }
        let body = if (0xA0..=0xBF).contains(&bytes[0]) {
            bytes
        } else {
            if bytes.len() < LENGTH_PREFIX_LENGTH {
                return Err(Error::Corrupt);
            }
            &bytes[LENGTH_PREFIX_LENGTH..]
        };
        cbor_deserialize(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct MemStorage {
        blob: Option<heapless_bytes::Bytes<PERSISTED_BLOB_CAPACITY>>,
        fail_next: bool,
    }

    impl MemStorage {
        fn empty() -> Self {
            Self { blob: None, fail_next: false }
        }
    }

    impl Storage for MemStorage {
        fn load(&mut self) -> Result<heapless_bytes::Bytes<PERSISTED_BLOB_CAPACITY>> {
            self.blob.clone().ok_or(Error::NotFound)
        }

        fn store(&mut self, bytes: &[u8]) -> Result<()> {
            if self.fail_next {
                self.fail_next = false;
                return Err(Error::StorageError);
            }
            self.blob = Some(heapless_bytes::Bytes::from_slice(bytes).map_err(|_| Error::StorageError)?);
            Ok(())
        }
    }

    struct FixedRand(u8);
    impl Rand for FixedRand {
        fn fill(&mut self, buf: &mut [u8]) {
            for (i, b) in buf.iter_mut().enumerate() {
                *b = self.0.wrapping_add(i as u8);
                self.0 = self.0.wrapping_add(1);
            }
        }
    }

    #[test]
    fn load_before_reset_is_not_found() {
        let mut storage = MemStorage::empty();
        assert_eq!(PublicData::load(&mut storage).unwrap_err(), Error::NotFound);
    }

    #[test]
    fn reset_then_load_round_trips() {
        let mut storage = MemStorage::empty();
        let mut rand = FixedRand(1);
        let (pd, secret, key) = PublicData::reset(&mut storage, &mut rand, 0, false).unwrap();
        assert_eq!(secret.pin_length, crate::constants::DEFAULT_PIN_LENGTH);
        assert_eq!(pd.meta.pin_retries, MAX_PIN_RETRIES);

        let loaded = PublicData::load(&mut storage).unwrap();
        assert_eq!(loaded, pd);

        let reopened = open_secret(&loaded, &key).unwrap();
        assert_eq!(reopened, secret);
    }

    #[test]
    fn default_pin_validates_and_wrong_pin_decrements_retries() {
        let mut storage = MemStorage::empty();
        let mut rand = FixedRand(7);
        let (mut pd, _secret, _key) = PublicData::reset(&mut storage, &mut rand, 0, false).unwrap();

        let (secret, _key) = pd.validate_pin(&mut storage, crate::constants::DEFAULT_PIN).unwrap();
        assert_eq!(secret.pin_length, crate::constants::DEFAULT_PIN_LENGTH);
        assert_eq!(pd.meta.pin_retries, MAX_PIN_RETRIES);

        assert_eq!(pd.validate_pin(&mut storage, b"wrong").unwrap_err(), Error::PinInvalid);
        assert_eq!(pd.meta.pin_retries, MAX_PIN_RETRIES - 1);
    }

    #[test]
    fn retries_exhausted_fails_fast_without_touching_storage() {
        let mut storage = MemStorage::empty();
        let mut rand = FixedRand(3);
        let (mut pd, _secret, _key) = PublicData::reset(&mut storage, &mut rand, 0, false).unwrap();
        pd.meta.pin_retries = 0;

        assert_eq!(pd.validate_pin(&mut storage, b"wrong").unwrap_err(), Error::PinBlocked);
    }

    #[test]
    fn nonce_is_monotone_across_updates() {
        let mut storage = MemStorage::empty();
        let mut rand = FixedRand(9);
        let (mut pd, secret, key) = PublicData::reset(&mut storage, &mut rand, 5, false).unwrap();
        let start = u32::from_le_bytes(pd.meta.nonce_ctr[..4].try_into().unwrap());

        for _ in 0..10 {
            pd.update_secret(&mut storage, &secret, &key).unwrap();
        }

        let end = u32::from_le_bytes(pd.meta.nonce_ctr[..4].try_into().unwrap());
        assert_eq!(end, start + 10);
    }

    #[test]
    fn storage_error_leaves_in_ram_state_untouched() {
        let mut storage = MemStorage::empty();
        let mut rand = FixedRand(11);
        let (mut pd, secret, key) = PublicData::reset(&mut storage, &mut rand, 0, false).unwrap();
        let before = pd.clone();

        storage.fail_next = true;
        assert_eq!(pd.update_secret(&mut storage, &secret, &key).unwrap_err(), Error::StorageError);
        assert_eq!(pd, before);
    }

    #[test]
    fn deserialize_tolerates_bare_cbor_without_length_prefix() {
        let mut storage = MemStorage::empty();
        let mut rand = FixedRand(13);
        let (pd, _secret, _key) = PublicData::reset(&mut storage, &mut rand, 0, false).unwrap();

        let bare = cbor_serialize::<_, PERSISTED_BLOB_CAPACITY>(&pd).unwrap();
        let decoded = PublicData::deserialize(&bare).unwrap();
        assert_eq!(decoded, pd);
    }
}
