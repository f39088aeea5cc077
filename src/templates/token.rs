//! Line normalisation: raw log line -> canonical token sequence. Each
//! whitespace-split word is run through a small battery of regexes (UUID,
//! IPv4, numeric, hex, quoted) and replaced with a wildcard on a match,
//! else kept as a literal.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// One position in a template. `Wildcard` means "any value was observed
/// here"; a template is a `Vec<Token>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Token {
    Literal(String),
    Wildcard,
}

impl Token {
    pub fn is_wildcard(&self) -> bool {
        matches!(self, Token::Wildcard)
    }

    /// Canonical rendering used both for the leaf key and for the
    /// content-hash input; stable across merges because a merge can only
    /// turn a `Literal` into a `Wildcard`, never the reverse.
    pub fn canonical(&self) -> &str {
        match self {
            Token::Literal(s) => s,
            Token::Wildcard => "*",
        }
    }
}

static UUID_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}$").unwrap()
});
static IPV4_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\d{1,3}\.){3}\d{1,3}$").unwrap());
static NUMERIC_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[0-9][0-9.:,-]*$").unwrap());
static HEX_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(0x)?[0-9a-f]{6,}$").unwrap());

fn is_quoted(word: &str) -> bool {
    let bytes = word.as_bytes();
    bytes.len() >= 2
        && ((bytes[0] == b'"' && bytes[bytes.len() - 1] == b'"')
            || (bytes[0] == b'\'' && bytes[bytes.len() - 1] == b'\''))
}

fn classify(word: &str) -> Token {
    if is_quoted(word)
        || UUID_RE.is_match(word)
        || IPV4_RE.is_match(word)
        || NUMERIC_RE.is_match(word)
        || HEX_RE.is_match(word)
    {
        Token::Wildcard
    } else {
        Token::Literal(word.to_string())
    }
}

/// Lowercase, split on whitespace, classify each word.
pub fn normalize(line: &str) -> Vec<Token> {
    line.to_lowercase().split_whitespace().map(classify).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_words_survive() {
        let tokens = normalize("connection refused to upstream");
        assert_eq!(
            tokens,
            vec![
                Token::Literal("connection".into()),
                Token::Literal("refused".into()),
                Token::Literal("to".into()),
                Token::Literal("upstream".into()),
            ]
        );
    }

    #[test]
    fn numeric_uuid_ip_hex_and_quoted_become_wildcard() {
        let tokens = normalize(
            "user 4f81c2 failed id=550e8400-e29b-41d4-a716-446655440000 from 10.0.0.1 code 0x1a2b3c4d msg \"bad request\"",
        );
        assert_eq!(tokens[1], Token::Wildcard); // "4f81c2" hex-shaped
        assert_eq!(tokens[3], Token::Wildcard); // uuid
        assert_eq!(tokens[5], Token::Wildcard); // ip
        assert_eq!(tokens[7], Token::Wildcard); // hex
        assert_eq!(tokens[8], Token::Wildcard); // quoted string
    }

    #[test]
    fn classification_is_case_insensitive() {
        let tokens = normalize("ERROR Connection-Refused");
        assert_eq!(tokens[0], Token::Literal("error".into()));
        assert_eq!(tokens[1], Token::Literal("connection-refused".into()));
    }
}
