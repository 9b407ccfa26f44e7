/// bcrypt work factor for stored passwords.
pub const PASSWORD_COST: u32 = 10;

/// Salted one-way hash of a plaintext password.
pub fn hash_password(plaintext: &str) -> Result<String, bcrypt::BcryptError> {
    bcrypt::hash(plaintext, PASSWORD_COST)
}

/// Verify plaintext against a stored hash. A malformed hash never verifies.
pub fn verify_password(plaintext: &str, hash: &str) -> bool {
    bcrypt::verify(plaintext, hash).unwrap_or(false)
}
