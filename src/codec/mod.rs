//! Short-code codec
//!
//! Two code families share the `short_code` namespace:
//!
//! 1. Minted codes: the link ID is scrambled with a Knuth multiplicative
//!    hash (`id * PRIME ^ XOR_KEY` in wrapping u64 arithmetic) and then
//!    base58-encoded with the Bitcoin alphabet. Decoding reverses both
//!    steps via the modular inverse of the prime.
//! 2. Custom aliases: user-supplied, validated against charset, length and
//!    a reserved-word set.
//!
//! The codec is pure; a minted code can never collide with another minted
//! code, and alias-vs-minted collisions are caught by the unique constraint
//! at persistence time.

use crate::errors::{AppError, Result};

/// Base58 alphabet (Bitcoin style): digits and letters minus 0, O, I, l.
const ALPHABET: &[u8] = b"123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";
const BASE: u64 = 58;

/// Scramble constants. PRIME_INVERSE is the modular multiplicative inverse
/// of PRIME mod 2^64; `test_prime_inverse_is_correct` guards the pair, since
/// a wrong inverse silently breaks every decode.
const PRIME: u64 = 982_451_653;
const PRIME_INVERSE: u64 = 3_614_514_443_900_825_869;
const XOR_KEY: u64 = 123_456_789;

/// Aliases that would shadow routes or confuse operators.
const RESERVED_ALIASES: &[&str] = &[
    "admin",
    "api",
    "assets",
    "auth",
    "dashboard",
    "health",
    "login",
    "logout",
    "metrics",
    "static",
    "urls",
    "www",
];

const ALIAS_MIN_LEN: usize = 3;
const ALIAS_MAX_LEN: usize = 50;

/// Encode a minted ID into an opaque short code.
pub fn encode(id: u64) -> String {
    let scrambled = id.wrapping_mul(PRIME) ^ XOR_KEY;
    encode_base58(scrambled)
}

/// Decode a minted short code back to its ID.
///
/// Returns `NotFound` for codes that are not valid base58 or overflow u64;
/// from the resolver's point of view such codes simply name no link.
pub fn decode(code: &str) -> Result<u64> {
    let scrambled = decode_base58(code)?;
    let unxored = scrambled ^ XOR_KEY;
    Ok(unxored.wrapping_mul(PRIME_INVERSE))
}

/// Validate a user-supplied custom alias.
///
/// 3-50 chars of `[A-Za-z0-9-]`, case-sensitive, not a reserved word.
pub fn validate_alias(alias: &str) -> Result<()> {
    if alias.len() < ALIAS_MIN_LEN || alias.len() > ALIAS_MAX_LEN {
        return Err(AppError::invalid_request(format!(
            "custom alias must be {}-{} characters, got {}",
            ALIAS_MIN_LEN,
            ALIAS_MAX_LEN,
            alias.len()
        )));
    }

    if !alias
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'-')
    {
        return Err(AppError::invalid_request(
            "custom alias may only contain letters, digits and '-'",
        ));
    }

    // 保留字比较不区分大小写，避免 "Admin" 绕过
    let lower = alias.to_ascii_lowercase();
    if RESERVED_ALIASES.contains(&lower.as_str()) {
        return Err(AppError::invalid_request(format!(
            "'{}' is a reserved word and cannot be used as an alias",
            alias
        )));
    }

    Ok(())
}

fn encode_base58(mut n: u64) -> String {
    if n == 0 {
        return (ALPHABET[0] as char).to_string();
    }

    let mut out = Vec::with_capacity(11);
    while n > 0 {
        out.push(ALPHABET[(n % BASE) as usize]);
        n /= BASE;
    }
    out.reverse();

    // ALPHABET 是 ASCII，安全
    String::from_utf8(out).expect("base58 alphabet is ASCII")
}

fn decode_base58(s: &str) -> Result<u64> {
    if s.is_empty() {
        return Err(AppError::not_found("empty short code"));
    }

    let mut n: u64 = 0;
    for &b in s.as_bytes() {
        let index = ALPHABET
            .iter()
            .position(|&a| a == b)
            .ok_or_else(|| AppError::not_found(format!("invalid base58 character: {}", b as char)))?;

        n = n
            .checked_mul(BASE)
            .and_then(|v| v.checked_add(index as u64))
            .ok_or_else(|| AppError::not_found("short code overflows u64"))?;
    }

    Ok(n)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prime_inverse_is_correct() {
        // (P * P^-1) mod 2^64 == 1，否则 decode 不再是 encode 的逆
        assert_eq!(PRIME.wrapping_mul(PRIME_INVERSE), 1);
    }

    #[test]
    fn test_round_trip_edges() {
        for id in [0u64, 1, 2, 57, 58, 59, u64::MAX - 1, u64::MAX] {
            let code = encode(id);
            assert_eq!(decode(&code).unwrap(), id, "round trip failed for {}", id);
        }
    }

    #[test]
    fn test_round_trip_sweep() {
        // 跨越多个数量级
        let mut id: u64 = 1;
        while id < u64::MAX / 7 {
            let code = encode(id);
            assert_eq!(decode(&code).unwrap(), id);
            id = id.wrapping_mul(7).wrapping_add(13);
        }
    }

    #[test]
    fn test_zero_encodes_to_first_alphabet_char() {
        // 0 打乱后仍可能非 0；直接验证 base58 编码器本身
        assert_eq!(encode_base58(0), "1");
        assert_eq!(decode_base58("1").unwrap(), 0);
    }

    #[test]
    fn test_codes_look_opaque() {
        // 相邻 ID 的编码不应相邻
        let a = encode(1000);
        let b = encode(1001);
        assert_ne!(a, b);
        let common_prefix = a
            .bytes()
            .zip(b.bytes())
            .take_while(|(x, y)| x == y)
            .count();
        assert!(
            common_prefix < a.len().min(b.len()),
            "adjacent IDs produced near-identical codes"
        );
    }

    #[test]
    fn test_decode_rejects_excluded_characters() {
        for bad in ["ab0", "abO", "abI", "abl", "ab!"] {
            assert!(decode(bad).is_err(), "{} should be rejected", bad);
        }
    }

    #[test]
    fn test_decode_rejects_overflow() {
        // 12 个 'z' 超出 u64 范围
        assert!(decode("zzzzzzzzzzzz").is_err());
    }

    #[test]
    fn test_alias_validation() {
        assert!(validate_alias("my-link-2024").is_ok());
        assert!(validate_alias("abc").is_ok());
        assert!(validate_alias(&"a".repeat(50)).is_ok());

        assert!(validate_alias("ab").is_err());
        assert!(validate_alias(&"a".repeat(51)).is_err());
        assert!(validate_alias("has space").is_err());
        assert!(validate_alias("under_score").is_err());
        assert!(validate_alias("admin").is_err());
        assert!(validate_alias("Admin").is_err());
        assert!(validate_alias("API").is_err());
    }

    #[test]
    fn test_alias_is_case_sensitive_but_reserved_check_is_not() {
        // 合法别名大小写敏感（"MyLink" 与 "mylink" 是不同别名）
        assert!(validate_alias("MyLink").is_ok());
        assert!(validate_alias("mylink").is_ok());
    }
}
