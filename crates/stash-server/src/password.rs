use anyhow::Result;
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier as _, SaltString},
    Argon2,
};

/// Checks a plaintext password against a stored hash.
///
/// `Ok(false)` is a mismatch; `Err` means the hash could not be processed.
pub trait PasswordVerifier: Send + Sync {
    fn verify(&self, plaintext: &str, hash: &str) -> Result<bool>;
}

/// Argon2id password hashes in PHC string format.
#[derive(Debug, Clone, Copy, Default)]
pub struct Argon2Passwords;

impl PasswordVerifier for Argon2Passwords {
    fn verify(&self, plaintext: &str, hash: &str) -> Result<bool> {
        let parsed =
            PasswordHash::new(hash).map_err(|e| anyhow::anyhow!("parse password hash: {e}"))?;
        match Argon2::default().verify_password(plaintext.as_bytes(), &parsed) {
            Ok(()) => Ok(true),
            Err(argon2::password_hash::Error::Password) => Ok(false),
            Err(e) => Err(anyhow::anyhow!("verify password: {e}")),
        }
    }
}

/// Hash `plaintext` with a fresh random salt.
pub fn hash_password(plaintext: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(plaintext.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("argon2 hash: {e}"))?;
    Ok(hash.to_string())
}
