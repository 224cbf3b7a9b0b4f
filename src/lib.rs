//! Cryptographic core of a FIDO2/CTAP2 authenticator.
//!
//! Bootstraps and persists the authenticator's long-lived secret state,
//! derives per-credential signing keypairs from a single master secret,
//! negotiates a shared secret with the platform via ECDH and runs PIN/UV
//! Auth Protocol Two, and manages the lifecycle of the in-memory
//! `pinUvAuthToken`. The USB/NFC/BLE transport, CTAP2 command dispatch and
//! CBOR message framing, attestation assembly, user-presence UI, and the
//! storage medium itself are all out of scope; this crate only reaches out
//! through the four collaborator traits in [`collaborators`].
#![cfg_attr(not(test), no_std)]

#[cfg(test)]
extern crate std;

#[macro_use]
extern crate delog;
generate_macros!();

pub mod collaborators;
pub mod constants;
pub mod credential;
pub mod error;
pub mod persistence;
pub mod primitives;
pub mod token;

pub use collaborators::{Clock, Rand, Storage};
pub use credential::{derive_credential, new_credential, Context};
pub use error::{Error, Result};
pub use persistence::{PublicData, SecretData};
pub use primitives::{KeyPair, Point};
pub use token::{SharedSecret, TokenState};
