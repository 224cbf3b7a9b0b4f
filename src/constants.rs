//! Fixed sizes, labels and policy knobs.
//!
//! None of these are meant to be runtime-configurable: they are the exact
//! numbers the CTAP2 PIN/UV Auth Protocol Two and this authenticator's
//! storage format are defined against. Changing any of them changes the wire
//! format or the security margin, not just a tuning parameter.

/// Length in bytes of the master secret `M`.
pub const MASTER_SECRET_LENGTH: usize = 32;

/// Length in bytes of a credential context `CTX` (the opaque credential id).
pub const CONTEXT_LENGTH: usize = 32;

/// Length in bytes of the truncated PIN hash `PH` (`LEFT(SHA-256(PIN), 16)`).
pub const PIN_HASH_LENGTH: usize = 16;

/// Maximum PIN length in bytes (CTAP2: UTF-8 representation, 63 bytes).
pub const MAX_PIN_LENGTH: usize = 63;

/// `pin_retries` / `uv_retries` ceiling, and the value both are reset to.
pub const MAX_PIN_RETRIES: u8 = 8;

/// Length in bytes of the AES-256-GCM nonce used to seal `SecretData`.
pub const NONCE_LENGTH: usize = 12;

/// Length in bytes of the HKDF salt stored in `PublicData::salt`.
pub const SALT_LENGTH: usize = 32;

/// Length in bytes of an AES-256-GCM authentication tag.
pub const TAG_LENGTH: usize = 16;

/// Length in bytes of the ephemeral `pinUvAuthToken`.
pub const PIN_TOKEN_LENGTH: usize = 32;

/// Maximum length in bytes of a bound `rp_id`.
pub const MAX_RP_ID_LENGTH: usize = 128;

/// The default PIN set by `reset()`. CTAP2 authenticators with a known
/// factory PIN are a documented pre-production posture; see `reset()`'s
/// `force_pin_change` handling.
pub const DEFAULT_PIN: &[u8] = b"candystick";

/// `DEFAULT_PIN.len()`, spelled out because `SecretData::pin_length` is
/// persisted independently of the PIN bytes themselves.
pub const DEFAULT_PIN_LENGTH: u8 = 10;

/// HKDF `info` string for credential private key expansion.
pub const INFO_CREDENTIAL_KEY: &[u8] = b"CRED";

/// HKDF `info` string for the credential-id integrity subkey (feature
/// `credential-id-mac`, see `credential::mac`).
pub const INFO_CREDENTIAL_ID_MAC: &[u8] = b"CRED-ID-MAC";

/// HKDF `info` string for the transport HMAC key, fixed by PIN/UV Auth Protocol Two.
pub const INFO_HMAC_KEY: &[u8] = b"CTAP2 HMAC key";

/// HKDF `info` string for the transport AES key, fixed by PIN/UV Auth Protocol Two.
pub const INFO_AES_KEY: &[u8] = b"CTAP2 AES key";

/// 32 zero bytes: the fixed HKDF salt used when extracting the ECDH shared secret.
pub const ECDH_SALT: [u8; 32] = [0u8; 32];

/// `initial_usage_time_limit` and `user_present_time_limit`, reset on every `begin_using`.
pub const INITIAL_USAGE_TIME_LIMIT_MS: u32 = 19_000;

/// `user_present_time_limit`, identical value to `INITIAL_USAGE_TIME_LIMIT_MS` but
/// tracked separately because the two are reset independently in principle.
pub const USER_PRESENT_TIME_LIMIT_MS: u32 = 19_000;

/// `max_usage_time_period`, the hard ceiling on a token's in-use lifetime.
pub const MAX_USAGE_TIME_PERIOD_MS: u32 = 600_000;

/// Bit in `TokenState::permissions` for `largeBlobWrite`, preserved by
/// `clear_permissions_except_lbw`.
pub const PERMISSION_LARGE_BLOB_WRITE: u8 = 0x10;

/// Capacity in bytes of `PublicData::c`, the AEAD ciphertext of CBOR(`SecretData`).
/// `SecretData`'s string-keyed CBOR map (4 fields, 2 of them 32- and 16-byte
/// byte strings) comes in well under 128 bytes; this leaves headroom without
/// inviting an allocator.
pub const SECRET_DATA_CIPHERTEXT_CAPACITY: usize = 128;

/// Capacity in bytes of the `[u32_le length][CBOR]` framed `PublicData` blob
/// handed to `Storage::store` / returned by `Storage::load`.
pub const PERSISTED_BLOB_CAPACITY: usize = 320;

/// Length in bytes of the `u32` little-endian length prefix on a persisted blob.
pub const LENGTH_PREFIX_LENGTH: usize = 4;
