//! Random credential generation.

use rand::rngs::OsRng;
use rand::{Rng, RngCore};

use crate::error::ProvisionError;
use crate::types::Password;

/// Bounds on the raw credential length, in bytes before hex encoding.
pub const MIN_PASSWORD_BYTES: usize = 15;
pub const MAX_PASSWORD_BYTES: usize = 30;

/// Generate a random hex-encoded credential from the OS entropy source,
/// with a length drawn uniformly from the configured range.
///
/// The output alphabet is hex only, weaker than a general-purpose password
/// generator would allow. Acceptable for credentials that live for one test
/// run.
pub fn generate_password() -> Result<Password, ProvisionError> {
    let length = OsRng.gen_range(MIN_PASSWORD_BYTES..=MAX_PASSWORD_BYTES);
    let mut bytes = vec![0u8; length];
    OsRng.try_fill_bytes(&mut bytes)?;
    Ok(Password::new(hex::encode(bytes)))
}
