//! PIN/UV Auth Protocol Two and the in-RAM `pinUvAuthToken` lifecycle.
//!
//! Everything here is lost on power-off: the ephemeral ECDH keypair, the
//! token bytes, and the time-bounded "in-use" state machine are all
//! reconstructed fresh by [`TokenState::new`] at every boot.

use heapless_bytes::Bytes;
use zeroize::Zeroize;

use crate::debug;
use crate::collaborators::{Rand, RandCore};
use crate::constants::{
    ECDH_SALT, INFO_AES_KEY, INFO_HMAC_KEY, INITIAL_USAGE_TIME_LIMIT_MS, MAX_PIN_RETRIES,
    MAX_RP_ID_LENGTH, MAX_USAGE_TIME_PERIOD_MS, PERMISSION_LARGE_BLOB_WRITE, USER_PRESENT_TIME_LIMIT_MS,
};
use crate::error::{Error, Result};
use crate::primitives::{self, KeyPair};

/// The dual-purpose transport secret produced by [`TokenState::ecdh`]:
/// `shared[0..32]` is the HMAC key, `shared[32..64]` is the AES-256-CBC key.
pub type SharedSecret = [u8; 64];

fn split_shared(shared: &SharedSecret) -> (&[u8; 32], &[u8; 32]) {
    let (hmac_part, aes_part) = shared.split_at(32);
    (
        hmac_part.try_into().expect("split_at(32) on a 64-byte array"),
        aes_part.try_into().expect("split_at(32) on a 64-byte array"),
    )
}

/// The authenticator side of PIN/UV Auth Protocol Two: the ephemeral ECDH
/// keypair and the time-bounded `pinUvAuthToken` it guards.
pub struct TokenState {
    key_agreement_key: KeyPair,
    pin_token: [u8; 32],
    in_use: bool,
    permissions: u8,
    rp_id: Option<heapless::String<MAX_RP_ID_LENGTH>>,
    user_present: bool,
    user_verified: bool,
    initial_usage_time_limit: u32,
    user_present_time_limit: u32,
    max_usage_time_period: u32,
    usage_timer: Option<u32>,
    used: bool,
    pin_key: Option<[u8; 32]>,
    pin_retries: u8,
    uv_retries: u8,
}

impl Drop for TokenState {
    fn drop(&mut self) {
        self.pin_token.zeroize();
        if let Some(key) = self.pin_key.as_mut() {
            key.zeroize();
        }
    }
}

impl TokenState {
    /// Power-up bootstrap: a fresh ECDH keypair, a fresh `pinUvAuthToken`,
    /// and the Idle state with both retry mirrors at [`MAX_PIN_RETRIES`].
    pub fn new(rand: &mut impl Rand) -> Self {
        let key_agreement_key = primitives::p256_generate(&mut RandCore(rand));
        let mut pin_token = [0u8; 32];
        rand.fill(&mut pin_token);
        Self {
            key_agreement_key,
            pin_token,
            in_use: false,
            permissions: 0,
            rp_id: None,
            user_present: false,
            user_verified: false,
            initial_usage_time_limit: INITIAL_USAGE_TIME_LIMIT_MS,
            user_present_time_limit: USER_PRESENT_TIME_LIMIT_MS,
            max_usage_time_period: MAX_USAGE_TIME_PERIOD_MS,
            usage_timer: None,
            used: false,
            pin_key: None,
            pin_retries: MAX_PIN_RETRIES,
            uv_retries: MAX_PIN_RETRIES,
        }
    }

    /// Full power-up reinitialization: equivalent to replacing `self` with
    /// [`TokenState::new`]. Implemented as `regenerate` then
    /// `reset_pin_uv_auth_token`, per spec.
    pub fn initialize(&mut self, rand: &mut impl Rand) {
        *self = Self::new(rand);
    }

    /// Replaces the ephemeral ECDH keypair and wipes (zeroes, does not
    /// reissue) the `pinUvAuthToken`. Does not by itself clear `in_use`;
    /// callers that want a clean InUse state also call `stop_using`.
    pub fn regenerate(&mut self, rand: &mut impl Rand) {
        self.key_agreement_key = primitives::p256_generate(&mut RandCore(rand));
        self.pin_token.zeroize();
    }

    /// Draws a fresh random `pinUvAuthToken`.
    pub fn reset_pin_uv_auth_token(&mut self, rand: &mut impl Rand) {
        rand.fill(&mut self.pin_token);
    }

    /// The authenticator's ECDH public point as a COSE_Key
    /// (`ECDH-ES+HKDF-256`, P-256).
    pub fn get_public_key(&self) -> cosey::EcdhEsHkdf256PublicKey {
        cosey::EcdhEsHkdf256PublicKey {
            x: Bytes::from_slice(&self.key_agreement_key.public.x).expect("32 bytes fits Bytes<32>"),
            y: Bytes::from_slice(&self.key_agreement_key.public.y).expect("32 bytes fits Bytes<32>"),
        }
    }

    /// Runs the ECDH handshake against a platform-supplied COSE key and
    /// derives the 64-byte dual-purpose transport secret. Rejects an
    /// off-curve or identity peer key with [`Error::InvalidPoint`] without
    /// touching any state.
    pub fn ecdh(&self, peer: &cosey::EcdhEsHkdf256PublicKey) -> Result<SharedSecret> {
        let peer_x: [u8; 32] = (&peer.x[..]).try_into().map_err(|_| Error::InvalidPoint)?;
        let peer_y: [u8; 32] = (&peer.y[..]).try_into().map_err(|_| Error::InvalidPoint)?;
        let z = primitives::p256_ecdh(&self.key_agreement_key.private, &peer_x, &peer_y)?;

        let prk = primitives::hkdf_extract(&ECDH_SALT, &z);
        let mut shared = [0u8; 64];
        primitives::hkdf_expand(&prk, INFO_HMAC_KEY, &mut shared[..32]);
        primitives::hkdf_expand(&prk, INFO_AES_KEY, &mut shared[32..]);
        Ok(shared)
    }

    /// AES-256-CBC encryption under `shared[32..64]` with a freshly drawn
    /// IV, framed as `iv ‖ ct`. `plaintext.len()` MUST be a positive
    /// multiple of 16.
    pub fn encrypt(
        &self,
        rand: &mut impl Rand,
        shared: &SharedSecret,
        plaintext: &[u8],
    ) -> Result<heapless::Vec<u8, 272>> {
        let (_hmac_key, aes_key) = split_shared(shared);
        let mut iv = [0u8; 16];
        rand.fill(&mut iv);

        let ct = primitives::aes256_cbc_encrypt(&iv, aes_key, plaintext)?;
        let mut framed = heapless::Vec::<u8, 272>::new();
        framed.extend_from_slice(&iv).map_err(|_| Error::InvalidLength)?;
        framed.extend_from_slice(&ct).map_err(|_| Error::InvalidLength)?;
        Ok(framed)
    }

    /// The decryption dual of [`TokenState::encrypt`]: splits the leading
    /// 16-byte IV off `iv_ct` and decrypts the remainder under
    /// `shared[32..64]`. Cannot fail on integrity: AES-256-CBC is
    /// unauthenticated; the caller layers an HMAC over the ciphertext using
    /// `shared[0..32]` for that.
    pub fn decrypt(&self, shared: &SharedSecret, iv_ct: &[u8]) -> Result<heapless::Vec<u8, 256>> {
        if iv_ct.len() <= 16 {
            return Err(Error::InvalidLength);
        }
        let (_hmac_key, aes_key) = split_shared(shared);
        let (iv, ct) = iv_ct.split_at(16);
        let iv: [u8; 16] = iv.try_into().map_err(|_| Error::InvalidLength)?;
        primitives::aes256_cbc_decrypt(&iv, aes_key, ct)
    }

    /// `HMAC-SHA256(key, msg)`.
    pub fn authenticate(&self, key: &[u8], msg: &[u8]) -> [u8; 32] {
        primitives::hmac_sha256(key, msg)
    }

    /// Recomputes `authenticate(key, msg)` and compares it against `mac` in
    /// constant time. Never signals an error: callers must branch on the
    /// boolean without leaking timing.
    pub fn verify(&self, key: &[u8], msg: &[u8], mac: &[u8]) -> bool {
        primitives::ct_eq(&self.authenticate(key, msg), mac)
    }

    /// [`TokenState::verify`] specialized to the `pinUvAuthToken`: also
    /// returns `false` outright if the token is not currently `in_use`.
    pub fn verify_pin_token(&self, msg: &[u8], mac: &[u8]) -> bool {
        if !self.in_use {
            return false;
        }
        self.verify(&self.pin_token, msg, mac)
    }

    /// A copy of the live `pinUvAuthToken`, for handing to the caller to
    /// encrypt back to the platform. Returns `None` outside InUse.
    pub fn pin_token(&self) -> Option<[u8; 32]> {
        if self.in_use {
            Some(self.pin_token)
        } else {
            None
        }
    }

    /// Idle → InUse. `pin_key` is the storage key `K_s` the PIN/UV
    /// verification that authorized this token just derived; it is cached
    /// for the duration of the session and cleared on `stop_using`.
    pub fn begin_using(&mut self, user_is_present: bool, now_ms: u32, permissions: u8, pin_key: [u8; 32]) {
        debug!("pinUvAuthToken entering InUse, permissions={:#x}", permissions);
        self.in_use = true;
        self.user_present = user_is_present;
        self.user_verified = true;
        self.usage_timer = Some(now_ms);
        self.permissions = permissions;
        self.pin_key = Some(pin_key);
        self.initial_usage_time_limit = INITIAL_USAGE_TIME_LIMIT_MS;
        self.user_present_time_limit = USER_PRESENT_TIME_LIMIT_MS;
    }

    /// Binds the token to a relying-party id, truncating nothing and
    /// rejecting ids over [`MAX_RP_ID_LENGTH`] bytes.
    pub fn set_rp_id(&mut self, rp_id: &str) -> Result<()> {
        use core::str::FromStr;
        let bounded = heapless::String::<MAX_RP_ID_LENGTH>::from_str(rp_id).map_err(|_| Error::InvalidLength)?;
        self.rp_id = Some(bounded);
        Ok(())
    }

    pub fn rp_id(&self) -> Option<&str> {
        self.rp_id.as_deref()
    }

    /// Polls the usage clock. No-op outside InUse. Clears `user_present`
    /// once `user_present_time_limit` has elapsed; drops all the way back
    /// to Idle once either `initial_usage_time_limit` has elapsed without a
    /// `mark_used` call, or `max_usage_time_period` has elapsed outright.
    /// `now_ms` and `usage_timer` are both specified modulo 2^32, so the
    /// delta uses wrapping subtraction and is correct across a clock wrap.
    pub fn observe(&mut self, now_ms: u32) {
        let usage_timer = match self.usage_timer {
            Some(t) if self.in_use => t,
            _ => return,
        };
        let delta = now_ms.wrapping_sub(usage_timer);

        if delta > self.user_present_time_limit {
            self.user_present = false;
        }

        if (delta > self.initial_usage_time_limit && !self.used) || delta > self.max_usage_time_period {
            debug!("pinUvAuthToken timed out, returning to Idle");
            self.clear_to_idle();
        }
    }

    /// Marks the token as having completed at least one authenticated
    /// operation, lifting the `initial_usage_time_limit` bound and leaving
    /// only `max_usage_time_period` in effect.
    pub fn mark_used(&mut self) {
        self.used = true;
    }

    /// `permissions &= PERMISSION_LARGE_BLOB_WRITE`.
    pub fn clear_permissions_except_lbw(&mut self) {
        self.permissions &= PERMISSION_LARGE_BLOB_WRITE;
    }

    /// Unconditional InUse → Idle. Unlike the timeout path in `observe`,
    /// also clears the bound `rp_id` and resets `max_usage_time_period` to
    /// its 600 000 ms default.
    pub fn stop_using(&mut self) {
        self.clear_to_idle();
        self.rp_id = None;
        self.max_usage_time_period = MAX_USAGE_TIME_PERIOD_MS;
    }

    fn clear_to_idle(&mut self) {
        self.in_use = false;
        self.user_present = false;
        self.user_verified = false;
        self.permissions = 0;
        self.usage_timer = None;
        self.used = false;
        if let Some(key) = self.pin_key.as_mut() {
            key.zeroize();
        }
        self.pin_key = None;
        self.initial_usage_time_limit = INITIAL_USAGE_TIME_LIMIT_MS;
        self.user_present_time_limit = USER_PRESENT_TIME_LIMIT_MS;
    }

    pub fn in_use(&self) -> bool {
        self.in_use
    }

    pub fn permissions(&self) -> u8 {
        self.permissions
    }

    /// `user_verified && in_use`; false outside InUse regardless of the
    /// raw flag.
    pub fn get_user_verified_flag(&self) -> bool {
        self.user_verified && self.in_use
    }

    pub fn get_user_present_flag(&self) -> bool {
        self.user_present && self.in_use
    }

    pub fn pin_retries(&self) -> u8 {
        self.pin_retries
    }

    pub fn uv_retries(&self) -> u8 {
        self.uv_retries
    }

    pub fn set_pin_retries(&mut self, retries: u8) {
        self.pin_retries = retries.min(MAX_PIN_RETRIES);
    }

    pub fn set_uv_retries(&mut self, retries: u8) {
        self.uv_retries = retries.min(MAX_PIN_RETRIES);
    }
}
