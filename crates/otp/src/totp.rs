//! RFC 4226 / RFC 6238 code generation

use crate::config::TotpConfig;
use hmac::{Hmac, Mac};
use sha1::Sha1;

type HmacSha1 = Hmac<Sha1>;

/// HOTP value for a counter (RFC 4226 §5.3 dynamic truncation)
pub fn hotp(key: &[u8], counter: u64, digits: u32) -> u32 {
    let mut mac = HmacSha1::new_from_slice(key).expect("HMAC accepts keys of any length");
    mac.update(&counter.to_be_bytes());
    let hash = mac.finalize().into_bytes();

    let offset = (hash[hash.len() - 1] & 0x0f) as usize;
    let binary = ((u32::from(hash[offset]) & 0x7f) << 24)
        | (u32::from(hash[offset + 1]) << 16)
        | (u32::from(hash[offset + 2]) << 8)
        | u32::from(hash[offset + 3]);

    binary % 10u32.pow(digits)
}

/// Time step counter for a unix timestamp. Pre-epoch times clamp to step 0.
pub fn time_step(unix_secs: i64, step_secs: u64) -> u64 {
    u64::try_from(unix_secs).unwrap_or(0) / step_secs.max(1)
}

/// Zero-padded TOTP code at a unix timestamp
pub fn totp_at(key: &[u8], unix_secs: i64, config: &TotpConfig) -> String {
    let counter = time_step(unix_secs, config.step_secs);
    format_code(hotp(key, counter, config.digits), config.digits)
}

pub(crate) fn format_code(value: u32, digits: u32) -> String {
    format!("{:0width$}", value, width = digits as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    // RFC 6238 Appendix B, SHA1 seed
    const RFC_SEED: &[u8] = b"12345678901234567890";

    fn eight_digits() -> TotpConfig {
        TotpConfig {
            digits: 8,
            ..TotpConfig::default()
        }
    }

    #[test]
    fn test_rfc4226_hotp_vectors() {
        let expected = [755224, 287082, 359152, 969429, 338314];
        for (counter, value) in expected.iter().enumerate() {
            assert_eq!(hotp(RFC_SEED, counter as u64, 6), *value);
        }
    }

    #[test]
    fn test_rfc6238_totp_vectors() {
        let config = eight_digits();
        assert_eq!(totp_at(RFC_SEED, 59, &config), "94287082");
        assert_eq!(totp_at(RFC_SEED, 1_111_111_109, &config), "07081804");
        assert_eq!(totp_at(RFC_SEED, 1_234_567_890, &config), "89005924");
        assert_eq!(totp_at(RFC_SEED, 2_000_000_000, &config), "69279037");
    }

    #[test]
    fn test_six_digit_codes_are_zero_padded() {
        let code = totp_at(RFC_SEED, 1_111_111_109, &TotpConfig::default());
        assert_eq!(code, "081804");
    }

    #[test]
    fn test_time_step_clamps_negative() {
        assert_eq!(time_step(-100, 30), 0);
        assert_eq!(time_step(59, 30), 1);
        assert_eq!(time_step(60, 30), 2);
    }
}
