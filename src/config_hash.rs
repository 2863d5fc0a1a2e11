//! `configHash = SHA-256(config || sorted(referenced_secret_bytes) || CR.generation)`.
//!
//! The hash is recorded on the workload's pod template
//! (`dittofs.io/config-hash`) so that any change to the rendered config or to
//! a secret it depends on forces a rolling restart.

use sha2::{Digest, Sha256};

/// Computes the hex-encoded config hash. `referenced_secrets` is sorted
/// before hashing so that the result does not depend on the order secrets
/// were collected in (e.g. HashMap iteration order upstream).
pub fn compute_config_hash(config_bytes: &[u8], referenced_secrets: &[Vec<u8>], generation: i64) -> String {
    let mut sorted_secrets: Vec<&Vec<u8>> = referenced_secrets.iter().collect();
    sorted_secrets.sort();

    let mut hasher = Sha256::new();
    hasher.update(config_bytes);
    for secret in sorted_secrets {
        hasher.update(secret);
    }
    hasher.update(generation.to_be_bytes());

    let digest = hasher.finalize();
    to_hex(&digest)
}

fn to_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{:02x}", b));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stable_for_fixed_inputs() {
        let a = compute_config_hash(b"config", &[b"secret-a".to_vec()], 3);
        let b = compute_config_hash(b"config", &[b"secret-a".to_vec()], 3);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn order_of_referenced_secrets_does_not_matter() {
        let a = compute_config_hash(b"config", &[b"alpha".to_vec(), b"beta".to_vec()], 1);
        let b = compute_config_hash(b"config", &[b"beta".to_vec(), b"alpha".to_vec()], 1);
        assert_eq!(a, b);
    }

    #[test]
    fn changing_a_secret_changes_the_hash() {
        let a = compute_config_hash(b"config", &[b"secret-a".to_vec()], 1);
        let b = compute_config_hash(b"config", &[b"secret-b".to_vec()], 1);
        assert_ne!(a, b);
    }

    #[test]
    fn changing_generation_changes_the_hash() {
        let a = compute_config_hash(b"config", &[], 1);
        let b = compute_config_hash(b"config", &[], 2);
        assert_ne!(a, b);
    }

    #[test]
    fn changing_config_bytes_changes_the_hash() {
        let a = compute_config_hash(b"config-v1", &[], 1);
        let b = compute_config_hash(b"config-v2", &[], 1);
        assert_ne!(a, b);
    }
}
