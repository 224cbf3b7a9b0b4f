//! Thin, typed wrappers over the chosen crypto crates.
//!
//! This module is the only place in the crate that names a concrete crypto
//! library. Everything above it (credential derivation, persistence, the PIN
//! protocol) only ever talks to the functions below.

use aes::Aes256;
use aes_gcm::aead::{AeadInPlace, KeyInit};
use aes_gcm::{Aes256Gcm, Key as GcmKey, Nonce as GcmNonce, Tag as GcmTag};
use cbc::cipher::block_padding::NoPadding;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use elliptic_curve::sec1::{FromEncodedPoint, ToEncodedPoint};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use p256::{AffinePoint, EncodedPoint, PublicKey, SecretKey};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::error::{Error, Result};

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;
type HmacSha256 = Hmac<Sha256>;

/// An (uncompressed) P-256 point as raw 32-byte `x`/`y` coordinates.
#[derive(Clone, Copy, Debug, Eq, PartialEq, zeroize::Zeroize)]
pub struct Point {
    pub x: [u8; 32],
    pub y: [u8; 32],
}

/// A P-256 keypair: `priv` is a scalar, `pub` its curve-point image `priv * G`.
#[derive(zeroize::Zeroize)]
#[zeroize(drop)]
pub struct KeyPair {
    #[zeroize(skip)]
    pub public: Point,
    pub private: [u8; 32],
}

/// Generate a fresh random P-256 keypair.
pub fn p256_generate<R: rand_core::RngCore + rand_core::CryptoRng>(rng: &mut R) -> KeyPair {
    let secret = SecretKey::random(rng);
    keypair_from_secret(&secret)
}

/// Construct the (deterministic) P-256 keypair for a 32-byte scalar.
///
/// Returns `None` if the candidate scalar is zero or not less than the curve
/// order. The caller (credential derivation) is responsible for retrying
/// with a fresh HKDF expansion when this happens.
pub fn p256_from_scalar(scalar: &[u8; 32]) -> Option<KeyPair> {
    let secret = SecretKey::from_bytes(scalar.into()).ok()?;
    Some(keypair_from_secret(&secret))
}

fn keypair_from_secret(secret: &SecretKey) -> KeyPair {
    let public = secret.public_key();
    let encoded = public.to_encoded_point(false);
    let mut x = [0u8; 32];
    let mut y = [0u8; 32];
    x.copy_from_slice(encoded.x().expect("uncompressed point has x"));
    y.copy_from_slice(encoded.y().expect("uncompressed point has y"));
    let mut private = [0u8; 32];
    private.copy_from_slice(&secret.to_bytes());
    KeyPair {
        public: Point { x, y },
        private,
    }
}

/// Scalar multiplication of `priv` with the peer's affine point `(peer_x,
/// peer_y)`, returning the x-coordinate of the resulting shared point.
/// Rejects off-curve and identity peer points with [`Error::InvalidPoint`].
pub fn p256_ecdh(private: &[u8; 32], peer_x: &[u8; 32], peer_y: &[u8; 32]) -> Result<[u8; 32]> {
    let encoded = EncodedPoint::from_affine_coordinates(peer_x.into(), peer_y.into(), false);
    let peer_public: Option<PublicKey> = PublicKey::from_encoded_point(&encoded).into();
    let peer_public = peer_public.ok_or(Error::InvalidPoint)?;
    let secret = SecretKey::from_bytes(private.into()).map_err(|_| Error::InvalidPoint)?;

    let peer_affine: AffinePoint = *peer_public.as_affine();
    let scalar = secret.to_nonzero_scalar();
    let shared = elliptic_curve::ecdh::diffie_hellman(&scalar, &peer_affine);

    let mut z = [0u8; 32];
    z.copy_from_slice(shared.as_bytes().as_slice());
    Ok(z)
}

/// AES-256-CBC encryption, no padding. `plaintext.len()` MUST be a positive
/// multiple of 16; the caller guarantees block alignment (see
/// [`Error::InvalidLength`]).
pub fn aes256_cbc_encrypt(iv: &[u8; 16], key: &[u8; 32], plaintext: &[u8]) -> Result<heapless::Vec<u8, 256>> {
    if plaintext.is_empty() || plaintext.len() % 16 != 0 {
        return Err(Error::InvalidLength);
    }
    let mut buffer = heapless::Vec::<u8, 256>::new();
    buffer.extend_from_slice(plaintext).map_err(|_| Error::InvalidLength)?;
    let pt_len = buffer.len();
    let enc = Aes256CbcEnc::new(key.into(), iv.into());
    enc.encrypt_padded_mut::<NoPadding>(&mut buffer, pt_len)
        .map_err(|_| Error::InvalidLength)?;
    Ok(buffer)
}

/// The decryption dual of [`aes256_cbc_encrypt`]. Cannot fail on well-formed
/// (block-aligned) input: AES-256-CBC without padding has no intrinsic
/// integrity check, by design (see Design Notes: integrity is layered on
/// top via an HMAC over the ciphertext).
pub fn aes256_cbc_decrypt(iv: &[u8; 16], key: &[u8; 32], ciphertext: &[u8]) -> Result<heapless::Vec<u8, 256>> {
    if ciphertext.is_empty() || ciphertext.len() % 16 != 0 {
        return Err(Error::InvalidLength);
    }
    let mut buffer = heapless::Vec::<u8, 256>::new();
    buffer.extend_from_slice(ciphertext).map_err(|_| Error::InvalidLength)?;
    let dec = Aes256CbcDec::new(key.into(), iv.into());
    let len = dec
        .decrypt_padded_mut::<NoPadding>(&mut buffer)
        .map_err(|_| Error::InvalidLength)?
        .len();
    buffer.truncate(len);
    Ok(buffer)
}

/// AES-256-GCM seal. `plaintext` and the returned ciphertext are the same
/// length; the 16-byte tag is returned separately, matching how
/// [`SecretData`](crate::persistence::SecretData) stores `c` and `tag` apart.
pub fn aes256_gcm_seal(
    key: &[u8; 32],
    nonce: &[u8; 12],
    aad: &[u8],
    plaintext: &[u8],
) -> Result<(heapless::Vec<u8, 128>, [u8; 16])> {
    let cipher = Aes256Gcm::new(GcmKey::<Aes256Gcm>::from_slice(key));
    let mut buffer = heapless::Vec::<u8, 128>::new();
    buffer.extend_from_slice(plaintext).map_err(|_| Error::InvalidLength)?;
    let tag = cipher
        .encrypt_in_place_detached(GcmNonce::from_slice(nonce), aad, &mut buffer)
        .map_err(|_| Error::AeadAuth)?;
    let mut tag_bytes = [0u8; 16];
    tag_bytes.copy_from_slice(tag.as_slice());
    Ok((buffer, tag_bytes))
}

/// AES-256-GCM open. Fails with [`Error::AeadAuth`] on any tag mismatch,
/// including a flipped bit in `ciphertext`, `tag` or `nonce`.
pub fn aes256_gcm_open(
    key: &[u8; 32],
    nonce: &[u8; 12],
    aad: &[u8],
    ciphertext: &[u8],
    tag: &[u8; 16],
) -> Result<heapless::Vec<u8, 128>> {
    let cipher = Aes256Gcm::new(GcmKey::<Aes256Gcm>::from_slice(key));
    let mut buffer = heapless::Vec::<u8, 128>::new();
    buffer.extend_from_slice(ciphertext).map_err(|_| Error::InvalidLength)?;
    cipher
        .decrypt_in_place_detached(GcmNonce::from_slice(nonce), aad, &mut buffer, GcmTag::from_slice(tag))
        .map_err(|_| Error::AeadAuth)?;
    Ok(buffer)
}

/// `HKDF-SHA256.extract(salt, ikm) -> prk` (32 bytes).
pub fn hkdf_extract(salt: &[u8], ikm: &[u8]) -> [u8; 32] {
    let (prk, _hkdf) = Hkdf::<Sha256>::extract(Some(salt), ikm);
    let mut out = [0u8; 32];
    out.copy_from_slice(&prk);
    out
}

/// `HKDF-SHA256.expand(prk, info, L) -> okm`, writing `L = out.len()` bytes.
pub fn hkdf_expand(prk: &[u8; 32], info: &[u8], out: &mut [u8]) {
    let hkdf = Hkdf::<Sha256>::from_prk(prk).expect("32-byte PRK is always valid for SHA-256");
    hkdf.expand(info, out).expect("requested output within 255 * hash-len");
}

/// `HMAC-SHA256(key, msg) -> mac` (32 bytes).
pub fn hmac_sha256(key: &[u8], msg: &[u8]) -> [u8; 32] {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(msg);
    let mut out = [0u8; 32];
    out.copy_from_slice(&mac.finalize().into_bytes());
    out
}

/// `SHA-256(data)` (32 bytes).
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let mut out = [0u8; 32];
    out.copy_from_slice(&hasher.finalize());
    out
}

/// Constant-time byte equality. Used for every comparison of MAC outputs,
/// PIN hashes and AEAD tags in this crate.
pub fn ct_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn cbc_round_trip_one_block() {
        let key = [0x11u8; 32];
        let iv = [0x22u8; 16];
        let pt = b"abcdefghjklmnopq";
        let ct = aes256_cbc_encrypt(&iv, &key, pt).unwrap();
        let back = aes256_cbc_decrypt(&iv, &key, &ct).unwrap();
        assert_eq!(&back[..], pt);
    }

    #[test]
    fn cbc_round_trip_three_blocks() {
        let key = [0x55u8; 32];
        let iv = [0x00u8; 16];
        let pt = [0xAAu8; 48];
        let ct = aes256_cbc_encrypt(&iv, &key, &pt).unwrap();
        assert_eq!(ct.len(), 48);
        let back = aes256_cbc_decrypt(&iv, &key, &ct).unwrap();
        assert_eq!(&back[..], &pt[..]);
    }

    #[test]
    fn cbc_rejects_misaligned_length() {
        let key = [0x11u8; 32];
        let iv = [0x22u8; 16];
        assert_eq!(aes256_cbc_encrypt(&iv, &key, b"not16").unwrap_err(), Error::InvalidLength);
    }

    #[test]
    fn cbc_matches_known_answer_vector() {
        // FIPS-197 Appendix C.3 AES-256 block cipher vector, run through CBC
        // with a zero IV: with IV = 0 the first block of CBC is exactly the
        // underlying block cipher applied to the plaintext.
        let key = hex!("000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f");
        let iv = [0u8; 16];
        let pt = hex!("00112233445566778899aabbccddeeff");
        let expected_ct = hex!("8ea2b7ca516745bfeafc49904b496089");

        let ct = aes256_cbc_encrypt(&iv, &key, &pt).unwrap();
        assert_eq!(&ct[..], &expected_ct[..]);

        let back = aes256_cbc_decrypt(&iv, &key, &ct).unwrap();
        assert_eq!(&back[..], &pt[..]);
    }

    #[test]
    fn gcm_matches_known_answer_vector() {
        // McGrew & Viega, "The Galois/Counter Mode of Operation", Test Case 14.
        let key = [0u8; 32];
        let nonce = [0u8; 12];
        let pt = [0u8; 16];
        let expected_ct = hex!("cea7403d4d606b6e074ec5d3baf39d18");
        let expected_tag = hex!("d0d1c8a799996bf0265b98b5d48ab919");

        let (ct, tag) = aes256_gcm_seal(&key, &nonce, b"", &pt).unwrap();
        assert_eq!(&ct[..], &expected_ct[..]);
        assert_eq!(tag, expected_tag);

        let back = aes256_gcm_open(&key, &nonce, b"", &ct, &tag).unwrap();
        assert_eq!(&back[..], &pt[..]);
    }

    #[test]
    fn gcm_round_trip_and_integrity() {
        let key = [0x42u8; 32];
        let nonce = [0x24u8; 12];
        let pt = b"super secret secret data";
        let (ct, tag) = aes256_gcm_seal(&key, &nonce, b"", pt).unwrap();
        let back = aes256_gcm_open(&key, &nonce, b"", &ct, &tag).unwrap();
        assert_eq!(&back[..], pt);

        let mut bad_ct = ct.clone();
        bad_ct[0] ^= 1;
        assert_eq!(aes256_gcm_open(&key, &nonce, b"", &bad_ct, &tag).unwrap_err(), Error::AeadAuth);

        let mut bad_tag = tag;
        bad_tag[0] ^= 1;
        assert_eq!(aes256_gcm_open(&key, &nonce, b"", &ct, &bad_tag).unwrap_err(), Error::AeadAuth);

        let mut bad_nonce = nonce;
        bad_nonce[0] ^= 1;
        assert_eq!(aes256_gcm_open(&key, &bad_nonce, b"", &ct, &tag).unwrap_err(), Error::AeadAuth);
    }

    #[test]
    fn hmac_matches_known_answer_vector() {
        let key = b"key";
        let msg = b"The quick brown fox jumps over the lazy dog";
        let expected = hex!("f7bc83f430538424b13298e6aa6fb143ef4d59a14946175997479dbc2d1a3cd8");
        assert_eq!(hmac_sha256(key, msg), expected);
    }

    #[test]
    fn hmac_determinism_and_verify_symmetry() {
        let key = hex!("0F76F061000102030405060708090A0B0C0D0E0F101112131415161718191A1B1C1D1E1F202122232425262728292A2B2C2D2E2F303132333435363738393A3B3C3D3E3F404142434445464748494A4B4C4D00");
        let msg = b"ctap2fido2webauthn";
        let mac = hmac_sha256(&key, msg);
        assert!(ct_eq(&mac, &hmac_sha256(&key, msg)));

        let mut bitflip_msg = *msg;
        bitflip_msg[0] ^= 1;
        assert!(!ct_eq(&mac, &hmac_sha256(&key, &bitflip_msg)));

        let mut bad_mac = mac;
        bad_mac[24] ^= 1;
        assert!(!ct_eq(&mac, &bad_mac));
    }

    #[test]
    fn ecdh_agreement_is_symmetric() {
        struct FakeRng(u8);
        impl rand_core::RngCore for FakeRng {
            fn next_u32(&mut self) -> u32 {
                let mut b = [0u8; 4];
                self.fill_bytes(&mut b);
                u32::from_le_bytes(b)
            }
            fn next_u64(&mut self) -> u64 {
                let mut b = [0u8; 8];
                self.fill_bytes(&mut b);
                u64::from_le_bytes(b)
            }
            fn fill_bytes(&mut self, dest: &mut [u8]) {
                for (i, b) in dest.iter_mut().enumerate() {
                    self.0 = self.0.wrapping_add(1);
                    *b = self.0.wrapping_add(i as u8);
                }
            }
            fn try_fill_bytes(&mut self, dest: &mut [u8]) -> core::result::Result<(), rand_core::Error> {
                self.fill_bytes(dest);
                Ok(())
            }
        }
        impl rand_core::CryptoRng for FakeRng {}

        let a = p256_generate(&mut FakeRng(1));
        let b = p256_generate(&mut FakeRng(77));

        let shared_ab = p256_ecdh(&a.private, &b.public.x, &b.public.y).unwrap();
        let shared_ba = p256_ecdh(&b.private, &a.public.x, &a.public.y).unwrap();
        assert_eq!(shared_ab, shared_ba);
    }

    #[test]
    fn ecdh_rejects_off_curve_point() {
        let a = p256_generate(&mut rand_core_test_rng());
        let bogus_x = [0xFFu8; 32];
        let bogus_y = [0xFFu8; 32];
        assert_eq!(p256_ecdh(&a.private, &bogus_x, &bogus_y).unwrap_err(), Error::InvalidPoint);
    }

    fn rand_core_test_rng() -> impl rand_core::RngCore + rand_core::CryptoRng {
        struct R(u64);
        impl rand_core::RngCore for R {
            fn next_u32(&mut self) -> u32 {
                self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1);
                (self.0 >> 32) as u32
            }
            fn next_u64(&mut self) -> u64 {
                let hi = self.next_u32() as u64;
                let lo = self.next_u32() as u64;
                (hi << 32) | lo
            }
            fn fill_bytes(&mut self, dest: &mut [u8]) {
                for chunk in dest.chunks_mut(4) {
                    let v = self.next_u32().to_le_bytes();
                    chunk.copy_from_slice(&v[..chunk.len()]);
                }
            }
            fn try_fill_bytes(&mut self, dest: &mut [u8]) -> core::result::Result<(), rand_core::Error> {
                self.fill_bytes(dest);
                Ok(())
            }
        }
        impl rand_core::CryptoRng for R {}
        R(0xDEADBEEF)
    }
}
