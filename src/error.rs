//! Flat error type for the authenticator core.
//!
//! All recoverable failures are returned through this enum; nothing is
//! swallowed. There is deliberately no `std::error::Error` impl (this crate
//! is `no_std`) and no `thiserror`: a hand-rolled `Display` is cheap and
//! keeps the dependency graph free of anything that assumes an allocator.

use core::fmt;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Error {
    /// No persisted blob exists yet; caller must run `reset`.
    NotFound,
    /// The persisted blob failed to CBOR-decode; caller must run `reset`.
    Corrupt,
    /// The persisted blob decoded but `valid == false`; caller must run `reset`.
    Invalid,
    /// AES-256-GCM tag check failed on `aes256_gcm_open`.
    AeadAuth,
    /// `validate_pin` was called with the wrong PIN.
    PinInvalid,
    /// `pin_retries` reached zero; a factory reset is required.
    PinBlocked,
    /// A peer-supplied ECDH public key was off-curve or the identity point.
    InvalidPoint,
    /// `persist_store` reported failure; in-RAM state was not mutated.
    StorageError,
    /// A plaintext was not a positive multiple of the AES block size.
    InvalidLength,
    /// `derive_credential` rejected a credential id whose integrity MAC did
    /// not verify (only reachable with the `credential-id-mac` feature).
    CredentialIdInvalid,
    /// Reserved: the `rand` collaborator is specified as infallible, but a
    /// caller-supplied implementation that panics internally should surface
    /// as this rather than corrupt state silently.
    InternalRng,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Error::NotFound => "no persisted state found",
            Error::Corrupt => "persisted state failed to decode",
            Error::Invalid => "persisted state marked invalid",
            Error::AeadAuth => "AEAD tag verification failed",
            Error::PinInvalid => "PIN did not match",
            Error::PinBlocked => "PIN retries exhausted",
            Error::InvalidPoint => "peer ECDH key is off-curve or identity",
            Error::StorageError => "persistent storage write failed",
            Error::InvalidLength => "plaintext is not block-aligned",
            Error::CredentialIdInvalid => "credential id integrity check failed",
            Error::InternalRng => "random number generator failed",
        };
        f.write_str(msg)
    }
}

pub type Result<T> = core::result::Result<T, Error>;
