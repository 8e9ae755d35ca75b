//! Hash-derived identities and content hashes.
//!
//! Identities are pure functions of a namespace and a seed string: the first
//! 16 bytes of SHA-256(`namespace` ++ `seed`) stamped as an RFC 9562 version 8
//! UUID. Changing a namespace string changes every id derived from it, so the
//! namespaces below are part of the artifact format.

use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Namespaces for derived identities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityNamespace {
    /// Task ids, seeded by recommendation id.
    Task,
    /// Release request ids, seeded by release key.
    Release,
    /// Approval follow-up request ids, seeded by `<blockedTaskId>:<target>`.
    ApprovalFollowUp,
}

impl IdentityNamespace {
    pub fn prefix(&self) -> &'static str {
        match self {
            IdentityNamespace::Task => "cognition-task:",
            IdentityNamespace::Release => "cognition-release:",
            IdentityNamespace::ApprovalFollowUp => "cognition-approval-follow-up:",
        }
    }
}

pub fn derive_identity(namespace: IdentityNamespace, seed: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(namespace.prefix().as_bytes());
    hasher.update(seed.as_bytes());
    let digest = hasher.finalize();

    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    Uuid::new_v8(bytes).to_string()
}

/// Lowercase hex SHA-256 of raw bytes.
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}
