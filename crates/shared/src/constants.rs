/// PBKDF2-SHA-256 iteration count for the identity/prekey blob KDF (§3).
pub const PBKDF2_ITERATIONS: u32 = 100_000;
/// Salt length in bytes for the PBKDF2 derivation (§3: 128-bit salt).
pub const PBKDF2_SALT_LEN: usize = 16;
/// Nonce length in bytes for the AES-256-GCM blob cipher (§3: 96-bit nonce).
pub const AES_GCM_NONCE_LEN: usize = 12;
/// AES-256 key length in bytes.
pub const AES_256_KEY_LEN: usize = 32;

/// Attachment chunk-size threshold in bytes (§4.3: "≈ 950 KiB").
pub const ATTACHMENT_CHUNK_THRESHOLD_BYTES: usize = 950 * 1024;
/// Maximum single file upload size.
pub const MAX_FILE_SIZE_BYTES: usize = 25 * 1024 * 1024;

/// Number of one-time prekeys generated at registration (§3).
pub const ONE_TIME_PRE_KEY_COUNT: u32 = 100;
/// Replenishment fires once the stored count drops below this (§4.5).
pub const PRE_KEY_LOW_WATER_MARK: u32 = 20;
/// Size of a replenishment batch (§4.5).
pub const PRE_KEY_REPLENISH_BATCH_SIZE: u32 = 100;

/// Base delay for the gateway's exponential reconnect backoff (§4.4).
pub const GATEWAY_RECONNECT_BASE_SECS: u64 = 1;
/// Upper bound on the (pre-jitter) reconnect backoff delay (§4.4).
pub const GATEWAY_RECONNECT_MAX_SECS: u64 = 30;
/// Heartbeat interval for the gateway connection.
pub const GATEWAY_HEARTBEAT_SECS: u64 = 30;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pbkdf2_iterations_matches_spec() {
        assert_eq!(PBKDF2_ITERATIONS, 100_000);
    }

    #[test]
    fn salt_and_nonce_lengths_match_spec_bit_widths() {
        assert_eq!(PBKDF2_SALT_LEN * 8, 128);
        assert_eq!(AES_GCM_NONCE_LEN * 8, 96);
        assert_eq!(AES_256_KEY_LEN * 8, 256);
    }

    #[test]
    fn chunk_threshold_is_approximately_950_kib() {
        assert_eq!(ATTACHMENT_CHUNK_THRESHOLD_BYTES, 950 * 1024);
        assert!(ATTACHMENT_CHUNK_THRESHOLD_BYTES < MAX_FILE_SIZE_BYTES);
    }

    #[test]
    fn prekey_low_water_mark_is_below_initial_count() {
        assert!(PRE_KEY_LOW_WATER_MARK < ONE_TIME_PRE_KEY_COUNT);
    }

    #[test]
    fn reconnect_base_is_below_cap() {
        assert!(GATEWAY_RECONNECT_BASE_SECS < GATEWAY_RECONNECT_MAX_SECS);
    }
}
