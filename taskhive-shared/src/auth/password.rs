/// Password hashing with bcrypt.
///
/// The cost factor comes from configuration and must stay within [10, 14]:
/// below 10 is too cheap to brute-force-resist, above 14 makes login
/// latency unacceptable. The bound is enforced where the auth service is
/// constructed, not here.

use crate::error::Error;

/// Hashes a plaintext password with the given bcrypt cost.
pub fn hash_password(password: &str, cost: u32) -> Result<String, Error> {
    bcrypt::hash(password, cost).map_err(|e| Error::Internal(format!("bcrypt hash failed: {e}")))
}

/// Verifies a plaintext password against a stored hash.
///
/// Returns `Ok(false)` on mismatch; errors only on malformed hashes.
pub fn verify_password(password: &str, hash: &str) -> Result<bool, Error> {
    bcrypt::verify(password, hash).map_err(|e| Error::Internal(format!("bcrypt verify failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    // Cost 4 is below the production floor but keeps the test fast; the
    // [10, 14] bound is enforced at service construction.
    #[test]
    fn hash_and_verify_round_trip() {
        let hash = hash_password("Password123", 4).unwrap();
        assert!(verify_password("Password123", &hash).unwrap());
        assert!(!verify_password("Password124", &hash).unwrap());
    }

    #[test]
    fn verify_rejects_garbage_hash() {
        assert!(verify_password("Password123", "not-a-bcrypt-hash").is_err());
    }
}
