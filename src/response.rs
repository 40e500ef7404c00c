//! Tolerant parser for risk-engine response text
//!
//! The engine answers with free text that should contain, anywhere,
//! `RATIO:<int>`, `CONFIDENCE:<int>` and `SOURCE:<TOKEN>`. The first
//! well-formed occurrence of each token wins. Nothing here fails: missing
//! values are filled with fallbacks and the result records whether a ratio
//! was actually found.

use serde::{Deserialize, Serialize};

/// Ratio (percent) used when the response carries no usable ratio
pub const FALLBACK_RATIO_PCT: i64 = 150;
/// Confidence recorded when nothing could be parsed
pub const UNPARSED_CONFIDENCE: i64 = 0;
/// Confidence assumed when a ratio was found without a confidence token
pub const DEFAULT_CONFIDENCE: i64 = 50;

/// Who produced the assessment
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AssessmentSource {
    AlgorithmicAi,
    BedrockAi,
    Fallback,
    Manual,
    Other(Box<str>),
}

impl AssessmentSource {
    pub fn from_token(token: &str) -> Self {
        match token {
            "ALGORITHMIC_AI" => Self::AlgorithmicAi,
            "BEDROCK_AI" => Self::BedrockAi,
            "FALLBACK" => Self::Fallback,
            "MANUAL" => Self::Manual,
            other => Self::Other(other.into()),
        }
    }

    pub fn as_token(&self) -> &str {
        match self {
            Self::AlgorithmicAi => "ALGORITHMIC_AI",
            Self::BedrockAi => "BEDROCK_AI",
            Self::Fallback => "FALLBACK",
            Self::Manual => "MANUAL",
            Self::Other(token) => token,
        }
    }
}

impl std::fmt::Display for AssessmentSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_token())
    }
}

/// Parsed response, values not yet clamped
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedResponse {
    pub ratio_pct: i64,
    pub confidence: i64,
    pub source: AssessmentSource,
    /// False when no `RATIO:` token was found and every field is a fallback
    pub parsed: bool,
}

impl ParsedResponse {
    pub fn fallback() -> Self {
        Self {
            ratio_pct: FALLBACK_RATIO_PCT,
            confidence: UNPARSED_CONFIDENCE,
            source: AssessmentSource::Fallback,
            parsed: false,
        }
    }
}

/// Parse engine response text
pub fn parse_response(text: &str) -> ParsedResponse {
    let Some(ratio_pct) = find_int(text, "RATIO:") else {
        return ParsedResponse::fallback();
    };
    ParsedResponse {
        ratio_pct,
        confidence: find_int(text, "CONFIDENCE:").unwrap_or(DEFAULT_CONFIDENCE),
        source: find_token(text, "SOURCE:")
            .map(AssessmentSource::from_token)
            .unwrap_or(AssessmentSource::Fallback),
        parsed: true,
    }
}

/// First occurrence of `key` immediately followed by an optionally signed integer
fn find_int(text: &str, key: &str) -> Option<i64> {
    text.match_indices(key).find_map(|(at, _)| {
        let rest = &text[at + key.len()..];
        let (negative, digits) = match rest.strip_prefix('-') {
            Some(stripped) => (true, stripped),
            None => (false, rest),
        };
        let len = digits.bytes().take_while(u8::is_ascii_digit).count();
        if len == 0 {
            return None;
        }
        // Saturate absurdly long numbers instead of rejecting them
        let value = digits[..len].parse::<i64>().unwrap_or(i64::MAX);
        Some(if negative { -value } else { value })
    })
}

/// First occurrence of `key` followed by a `[A-Z0-9_]+` token
fn find_token<'a>(text: &'a str, key: &str) -> Option<&'a str> {
    text.match_indices(key).find_map(|(at, _)| {
        let rest = &text[at + key.len()..];
        let len = rest
            .bytes()
            .take_while(|b| b.is_ascii_uppercase() || b.is_ascii_digit() || *b == b'_')
            .count();
        (len > 0).then(|| &rest[..len])
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_well_formed_response() {
        let parsed = parse_response("RATIO:140 CONFIDENCE:80 SOURCE:ALGORITHMIC_AI");
        assert_eq!(
            parsed,
            ParsedResponse {
                ratio_pct: 140,
                confidence: 80,
                source: AssessmentSource::AlgorithmicAi,
                parsed: true,
            }
        );
    }

    #[test]
    fn test_tokens_found_anywhere_in_free_text() {
        let text = "Assessment complete.\nDiversification good. SOURCE:BEDROCK_AI\nRATIO:175, CONFIDENCE:62.";
        let parsed = parse_response(text);
        assert_eq!(parsed.ratio_pct, 175);
        assert_eq!(parsed.confidence, 62);
        assert_eq!(parsed.source, AssessmentSource::BedrockAi);
    }

    #[test]
    fn test_first_well_formed_match_wins() {
        let parsed = parse_response("RATIO:abc RATIO:130 RATIO:190");
        assert_eq!(parsed.ratio_pct, 130);
    }

    #[test]
    fn test_adversarial_values_pass_through_unclamped() {
        let parsed = parse_response("RATIO:99999 CONFIDENCE:-5");
        assert_eq!(parsed.ratio_pct, 99999);
        assert_eq!(parsed.confidence, -5);
        assert!(parsed.parsed);

        let huge = parse_response("RATIO:999999999999999999999999");
        assert_eq!(huge.ratio_pct, i64::MAX);
    }

    #[test]
    fn test_missing_ratio_is_full_fallback() {
        assert_eq!(parse_response("engine timed out"), ParsedResponse::fallback());
        assert_eq!(parse_response(""), ParsedResponse::fallback());
        // Confidence alone is ignored
        assert_eq!(parse_response("CONFIDENCE:90"), ParsedResponse::fallback());
    }

    #[test]
    fn test_ratio_without_confidence_uses_default() {
        let parsed = parse_response("RATIO:160 SOURCE:something_lowercase");
        assert_eq!(parsed.confidence, DEFAULT_CONFIDENCE);
        assert_eq!(parsed.source, AssessmentSource::Fallback);
    }

    #[test]
    fn test_unknown_source_is_preserved() {
        let parsed = parse_response("RATIO:160 SOURCE:VENDOR_X2");
        assert_eq!(parsed.source, AssessmentSource::Other("VENDOR_X2".into()));
        assert_eq!(parsed.source.to_string(), "VENDOR_X2");
    }
}
