use std::sync::atomic::{AtomicBool, Ordering};

use grid_id::TwinId;
use grid_reconcile::{Identity, RpcError, RpcResult};
use sha2::{Digest, Sha256};

/// Deterministic signer: the signature is `sha256(twin_id || message)`.
#[derive(Debug)]
pub struct FakeIdentity {
    twin: TwinId,
    fail: AtomicBool,
}

impl FakeIdentity {
    pub fn new(twin: TwinId) -> Self {
        Self {
            twin,
            fail: AtomicBool::new(false),
        }
    }

    /// Make every later `sign` call fail.
    pub fn fail_signing(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }

    pub fn signature_for(&self, message: &[u8]) -> Vec<u8> {
        let mut hasher = Sha256::new();
        hasher.update(self.twin.get().to_be_bytes());
        hasher.update(message);
        hasher.finalize().to_vec()
    }

    /// Check a hex signature produced by [`Identity::sign`].
    pub fn verify(&self, message: &[u8], signature: &str) -> bool {
        hex::encode(self.signature_for(message)) == signature
    }
}

impl Identity for FakeIdentity {
    fn twin_id(&self) -> TwinId {
        self.twin
    }

    fn sign(&self, message: &[u8]) -> RpcResult<Vec<u8>> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(RpcError::new("signing key unavailable"));
        }
        Ok(self.signature_for(message))
    }
}
