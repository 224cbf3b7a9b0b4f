//! The four capabilities the core consumes from its host, and nothing else.
//!
//! The USB/NFC/BLE transport, the CTAP2 command dispatcher, the higher-level
//! registration/assertion orchestration and the actual flash/file storage
//! medium are all out of scope for this crate; it only ever reaches out
//! through these traits.

use crate::constants::PERSISTED_BLOB_CAPACITY;
use crate::error::Result;
use heapless_bytes::Bytes;
use rand_core::{CryptoRng, RngCore};

/// Cryptographically strong randomness. Implementations MUST NOT fail: a
/// hardware TRNG that cannot produce bytes right now should block until it
/// can, not return a default-initialized buffer.
pub trait Rand {
    fn fill(&mut self, buf: &mut [u8]);

    fn bytes32(&mut self) -> [u8; 32] {
        let mut out = [0u8; 32];
        self.fill(&mut out);
        out
    }
}

/// Adapts any [`Rand`] collaborator into an [`rand_core::RngCore`] so it can
/// be handed to `p256`'s keypair generation directly.
pub struct RandCore<'a, R: Rand>(pub &'a mut R);

impl<'a, R: Rand> RngCore for RandCore<'a, R> {
    fn next_u32(&mut self) -> u32 {
        let mut buf = [0u8; 4];
        self.0.fill(&mut buf);
        u32::from_le_bytes(buf)
    }

    fn next_u64(&mut self) -> u64 {
        let mut buf = [0u8; 8];
        self.0.fill(&mut buf);
        u64::from_le_bytes(buf)
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        self.0.fill(dest)
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> core::result::Result<(), rand_core::Error> {
        self.0.fill(dest);
        Ok(())
    }
}

// `Rand::fill` is specified as infallible and cryptographically strong, so
// asserting `CryptoRng` here is exactly the contract `rand(buf)` promises.
impl<'a, R: Rand> CryptoRng for RandCore<'a, R> {}

/// Monotonic millisecond clock. Wraps every ~49.7 days; every consumer of
/// this trait is required to use wrapping subtraction when computing
/// elapsed time so a wrap does not look like a very large time delta.
pub trait Clock {
    fn now_ms(&mut self) -> u32;
}

/// Opaque blob persistence. `PublicData` is the only thing ever passed
/// through this trait; the core does not care whether the bytes end up in
/// flash, a file, or an in-memory test double.
pub trait Storage {
    /// Maximum size in bytes of a blob this implementation can hold. Used
    /// by callers to size their backing buffer; not enforced by the trait
    /// itself.
    fn load(&mut self) -> Result<Bytes<PERSISTED_BLOB_CAPACITY>>;

    fn store(&mut self, bytes: &[u8]) -> Result<()>;
}
