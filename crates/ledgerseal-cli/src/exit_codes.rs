//! Exit codes for the `ledgerseal` binary.
//! These codes are part of the public contract; scripts branch on them.

use ledgerseal_core::TrustError;

pub const SUCCESS: i32 = 0;
pub const INVALID_INPUT: i32 = 1; // Bad arguments, files or configuration
pub const FORBIDDEN: i32 = 2; // Caller is not an admin
pub const CONFLICT: i32 = 3; // Unknown snapshot, last admin
pub const TRUST_FAILURE: i32 = 4; // Verification failed or rotation preflight refused
pub const STORAGE_FAILURE: i32 = 5; // Durable I/O error, safe to retry
pub const SIGNING_UNAVAILABLE: i32 = 6; // No signing key configured

/// Map an error chain onto an exit code.
pub fn from_error(err: &anyhow::Error) -> i32 {
    err.downcast_ref::<TrustError>()
        .map(TrustError::exit_code)
        .unwrap_or(INVALID_INPUT)
}
