//! PIN and guest-token generation.
//!
//! Both draw from the operating system RNG: guest PINs open real doors, so
//! predictability matters more than uniqueness.

use rand::distributions::Alphanumeric;
use rand::rngs::OsRng;
use rand::Rng;

/// Shortest and longest PIN the supported locks accept.
pub const MIN_CODE_LENGTH: usize = 4;
pub const MAX_CODE_LENGTH: usize = 10;

const GUEST_TOKEN_LENGTH: usize = 32;

/// Random `length`-digit string whose first digit is never `0`.
///
/// Rejection-samples the leading digit, so the result is uniform over all
/// codes without a leading zero.
pub fn generate_code(length: usize) -> String {
    let mut rng = OsRng;
    let mut code = String::with_capacity(length);
    if length == 0 {
        return code;
    }

    let first = loop {
        let digit = rng.gen_range(0..10u8);
        if digit != 0 {
            break digit;
        }
    };
    code.push(char::from(b'0' + first));
    for _ in 1..length {
        code.push(char::from(b'0' + rng.gen_range(0..10u8)));
    }
    code
}

/// Whether `code` is something a lock will take: 4 to 10 ASCII digits.
pub fn validate_code_format(code: &str) -> bool {
    (MIN_CODE_LENGTH..=MAX_CODE_LENGTH).contains(&code.len())
        && code.bytes().all(|b| b.is_ascii_digit())
}

/// `12****`, for logs.
pub fn mask_code(code: &str) -> String {
    let visible: String = code.chars().take(2).collect();
    format!("{visible}****")
}

/// Opaque token for the guest portal link.
pub fn generate_guest_token() -> String {
    OsRng
        .sample_iter(&Alphanumeric)
        .take(GUEST_TOKEN_LENGTH)
        .map(char::from)
        .collect()
}
