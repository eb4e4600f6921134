//! Cryptographic helpers for one-time codes
//!
//! - **Constant-time comparison** of submitted codes against stored ones
//! - **OTP generation** from the operating system CSPRNG

use rand::rngs::OsRng;
use rand::Rng;
use subtle::ConstantTimeEq;

/// Smallest six-digit code.
pub const OTP_MIN: u32 = 100_000;
/// Largest six-digit code.
pub const OTP_MAX: u32 = 999_999;

/// Compare two byte slices in constant time.
///
/// Length mismatches return `false` immediately; only the length leaks.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).into()
}

/// String wrapper around [`constant_time_eq`].
pub fn constant_time_str_eq(a: &str, b: &str) -> bool {
    constant_time_eq(a.as_bytes(), b.as_bytes())
}

/// Generate a six-digit verification code, uniform over `100000..=999999`.
pub fn generate_otp() -> String {
    OsRng.gen_range(OTP_MIN..=OTP_MAX).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_str_eq("482913", "482913"));
        assert!(!constant_time_str_eq("482913", "482914"));
        assert!(!constant_time_eq(b"short", b"longer"));
        assert!(constant_time_eq(b"", b""));
    }

    #[test]
    fn test_generate_otp_shape() {
        for _ in 0..500 {
            let code = generate_otp();
            assert_eq!(code.len(), 6);
            assert!(code.chars().all(|c| c.is_ascii_digit()));
            let value: u32 = code.parse().unwrap();
            assert!((OTP_MIN..=OTP_MAX).contains(&value));
        }
    }
}
