//! Deterministic tenant-to-variant assignment
//!
//! A pure function of tenant, salt and variant list. No state is stored, so
//! any run may call it concurrently.

use sha2::{Digest, Sha256};
use tgdigest_core::TenantId;

/// Bucket in `0..buckets` for a tenant under a salt.
pub fn bucket(tenant_id: &TenantId, salt: &str, buckets: usize) -> Option<usize> {
    if buckets == 0 {
        return None;
    }
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(b":");
    hasher.update(tenant_id.as_str().as_bytes());
    let digest = hasher.finalize();
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    Some((u64::from_be_bytes(prefix) % buckets as u64) as usize)
}

/// Variant assigned to a tenant, or `None` when there are no variants.
pub fn assign<'a>(tenant_id: &TenantId, salt: &str, variants: &'a [String]) -> Option<&'a str> {
    bucket(tenant_id, salt, variants.len()).map(|i| variants[i].as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn variants() -> Vec<String> {
        vec!["control".to_string(), "concise".to_string(), "detailed".to_string()]
    }

    #[test]
    fn test_assignment_is_stable() {
        let t = TenantId::new("acme");
        let v = variants();
        let first = assign(&t, "2025-q1", &v);
        for _ in 0..10 {
            assert_eq!(assign(&t, "2025-q1", &v), first);
        }
    }

    #[test]
    fn test_no_variants_no_assignment() {
        assert_eq!(assign(&TenantId::new("acme"), "s", &[]), None);
    }

    #[test]
    fn test_assignment_spreads_across_variants() {
        let v = variants();
        let mut seen = std::collections::HashSet::new();
        for i in 0..200 {
            if let Some(variant) = assign(&TenantId::new(format!("tenant-{}", i)), "salt", &v) {
                seen.insert(variant);
            }
        }
        assert_eq!(seen.len(), v.len());
    }

    proptest! {
        #[test]
        fn prop_bucket_in_range(tenant in "[a-z0-9]{1,16}", salt in ".{0,8}", n in 1usize..50) {
            let b = bucket(&TenantId::new(tenant), &salt, n).unwrap();
            prop_assert!(b < n);
        }
    }
}
