use rand::Rng;

const DIGITS: &[u8] = b"0123456789";
const LETTERS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Session token handed back on a successful handshake.
///
/// Nine digits followed by fifteen characters alternating letter/digit,
/// e.g. `835149712G3A2G7C6D8E1F2G`.
pub fn generate_session_token() -> String {
    let mut rng = rand::rng();
    let mut token = String::with_capacity(24);

    for _ in 0..9 {
        token.push(DIGITS[rng.random_range(0..DIGITS.len())] as char);
    }
    for i in 0..15 {
        let set = if i % 2 == 0 { LETTERS } else { DIGITS };
        token.push(set[rng.random_range(0..set.len())] as char);
    }

    token
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_shape() {
        let token = generate_session_token();
        assert_eq!(token.len(), 24);

        let bytes = token.as_bytes();
        assert!(bytes[..9].iter().all(u8::is_ascii_digit));
        for (i, b) in bytes[9..].iter().enumerate() {
            if i % 2 == 0 {
                assert!(b.is_ascii_uppercase(), "expected letter in {}", token);
            } else {
                assert!(b.is_ascii_digit(), "expected digit in {}", token);
            }
        }
    }

    #[test]
    fn test_tokens_differ() {
        assert_ne!(generate_session_token(), generate_session_token());
    }
}
