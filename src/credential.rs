//! Per-credential P-256 keypair derivation from the master secret.
//!
//! Credentials are never stored. Every `MakeCredential` mints a fresh
//! [`CONTEXT_LENGTH`]-byte `CTX` and hands it back to the relying party as
//! the credential id; every `GetAssertion` re-derives the same keypair from
//! `(M, CTX)`. The authenticator stays stateless per credential at the cost
//! of one HKDF per operation.

use crate::collaborators::Rand;
use crate::constants::{CONTEXT_LENGTH, INFO_CREDENTIAL_ID_MAC, INFO_CREDENTIAL_KEY, MASTER_SECRET_LENGTH};
use crate::error::{Error, Result};
use crate::primitives::{self, KeyPair, Point};

/// A 32-byte credential context, i.e. the bare credential id.
pub type Context = [u8; CONTEXT_LENGTH];

/// Re-expanding a candidate scalar that lands outside `[1, n)` is expected to
/// essentially never trigger (probability ~2^-32 per candidate) but the spec
/// requires it be handled rather than assumed away.
const MAX_SCALAR_ATTEMPTS: u8 = 8;

fn derive_keypair(master_secret: &[u8; MASTER_SECRET_LENGTH], ctx: &Context) -> KeyPair {
    let sub = primitives::hkdf_extract(ctx, master_secret);
    let mut info = heapless::Vec::<u8, 20>::new();
    info.extend_from_slice(INFO_CREDENTIAL_KEY).ok();

    for attempt in 0..MAX_SCALAR_ATTEMPTS {
        let mut candidate_info = info.clone();
        if attempt > 0 {
            candidate_info.push(attempt).ok();
        }
        let mut priv_bytes = [0u8; 32];
        primitives::hkdf_expand(&sub, &candidate_info, &mut priv_bytes);
        if let Some(keypair) = primitives::p256_from_scalar(&priv_bytes) {
            return keypair;
        }
    }
    unreachable!("P-256 scalar rejection probability is astronomically small")
}

/// Mint a fresh credential: draw `CTX` from `rand`, derive its keypair, and
/// return `(CTX, pub)`. `CTX` is what the caller returns to the relying
/// party as the opaque credential id.
pub fn new_credential(master_secret: &[u8; MASTER_SECRET_LENGTH], rand: &mut impl Rand) -> (Context, Point) {
    let ctx = rand.bytes32();
    let keypair = derive_keypair(master_secret, &ctx);
    (ctx, keypair.public)
}

/// Deterministically re-derive `(priv, pub)` from `(M, CTX)`. Pure: the same
/// inputs always yield bit-identical keys, across reboots.
pub fn derive_credential(master_secret: &[u8; MASTER_SECRET_LENGTH], ctx: &Context) -> KeyPair {
    derive_keypair(master_secret, ctx)
}

/// Subkey of `M` used to bind a truncated integrity MAC onto `CTX`, closing
/// the gap noted in the Design Notes: a mutated or forged `CTX` is rejected
/// before it is ever run through `derive_keypair`. Gated behind the
/// `credential-id-mac` feature, off by default, see `SPEC_FULL.md`.
#[cfg(feature = "credential-id-mac")]
mod mac {
    use super::*;

    pub const MAC_LENGTH: usize = 16;

    fn subkey(master_secret: &[u8; MASTER_SECRET_LENGTH]) -> [u8; 32] {
        let prk = primitives::hkdf_extract(&[0u8; 32], master_secret);
        let mut subkey = [0u8; 32];
        primitives::hkdf_expand(&prk, INFO_CREDENTIAL_ID_MAC, &mut subkey);
        subkey
    }

    /// `CTX ‖ LEFT(HMAC-SHA256(subkey(M), CTX), 16)`, i.e. the credential id
    /// this feature actually hands to the relying party.
    pub fn append(master_secret: &[u8; MASTER_SECRET_LENGTH], ctx: &Context) -> heapless::Vec<u8, 48> {
        let tag = primitives::hmac_sha256(&subkey(master_secret), ctx);
        let mut out = heapless::Vec::<u8, 48>::new();
        out.extend_from_slice(ctx).ok();
        out.extend_from_slice(&tag[..MAC_LENGTH]).ok();
        out
    }

    /// Split a `credential_id` produced by [`append`] back into its `CTX`
    /// after verifying the trailing MAC in constant time.
    pub fn verify_and_split(
        master_secret: &[u8; MASTER_SECRET_LENGTH],
        credential_id: &[u8],
    ) -> Result<Context> {
        if credential_id.len() != CONTEXT_LENGTH + MAC_LENGTH {
            return Err(Error::CredentialIdInvalid);
        }
        let (ctx_bytes, mac_bytes) = credential_id.split_at(CONTEXT_LENGTH);
        let tag = primitives::hmac_sha256(&subkey(master_secret), ctx_bytes);
        if !primitives::ct_eq(&tag[..MAC_LENGTH], mac_bytes) {
            return Err(Error::CredentialIdInvalid);
        }
        let mut ctx = [0u8; CONTEXT_LENGTH];
        ctx.copy_from_slice(ctx_bytes);
        Ok(ctx)
    }
}

#[cfg(feature = "credential-id-mac")]
pub use mac::{append as mac_append, verify_and_split as mac_verify_and_split};

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedRand(u8);
    impl Rand for FixedRand {
        fn fill(&mut self, buf: &mut [u8]) {
            for (i, b) in buf.iter_mut().enumerate() {
                *b = self.0.wrapping_add(i as u8);
            }
        }
    }

    #[test]
    fn derive_credential_is_deterministic() {
        let m = [7u8; 32];
        let ctx = [9u8; 32];
        let a = derive_credential(&m, &ctx);
        let b = derive_credential(&m, &ctx);
        assert_eq!(a.private, b.private);
        assert_eq!(a.public, b.public);
    }

    #[test]
    fn different_contexts_yield_different_keys() {
        let m = [7u8; 32];
        let a = derive_credential(&m, &[1u8; 32]);
        let b = derive_credential(&m, &[2u8; 32]);
        assert_ne!(a.private, b.private);
    }

    #[test]
    fn new_credential_returns_matching_keypair() {
        let m = [3u8; 32];
        let mut rand = FixedRand(42);
        let (ctx, public) = new_credential(&m, &mut rand);
        let rederived = derive_credential(&m, &ctx);
        assert_eq!(rederived.public, public);
    }

    #[cfg(feature = "credential-id-mac")]
    #[test]
    fn credential_id_mac_round_trips_and_rejects_tamper() {
        let m = [11u8; 32];
        let ctx = [22u8; 32];
        let id = mac_append(&m, &ctx);
        let recovered = mac_verify_and_split(&m, &id).unwrap();
        assert_eq!(recovered, ctx);

        let mut tampered = id.clone();
        tampered[0] ^= 1;
        assert!(mac_verify_and_split(&m, &tampered).is_err());
    }
}
