//! SHAKE128 digests over data moved across the bus.

use sha3::digest::{ExtendableOutput, Update, XofReader};
use sha3::Shake128;

pub const DIGEST_LEN: usize = 32;

/// Incremental SHAKE128 context. `finalize` consumes it, so a context is
/// single use.
#[derive(Clone, Default)]
pub struct Shake128Context {
    inner: Shake128,
}

impl Shake128Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, data: &[u8]) {
        Update::update(&mut self.inner, data);
    }

    pub fn finalize(self) -> [u8; DIGEST_LEN] {
        let mut out = [0u8; DIGEST_LEN];
        self.finalize_into(&mut out);
        out
    }

    /// Squeezes `out.len()` bytes of output.
    pub fn finalize_into(self, out: &mut [u8]) {
        self.inner.finalize_xof().read(out);
    }
}

pub fn shake128(data: &[u8]) -> [u8; DIGEST_LEN] {
    let mut context = Shake128Context::new();
    context.update(data);
    context.finalize()
}
