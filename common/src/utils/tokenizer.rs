use std::sync::OnceLock;

use tiktoken_rs::{cl100k_base, CoreBPE};

use crate::error::AppError;

/// Shared cl100k byte-pair encoder.
///
/// Construction parses the embedded encoding table once; afterwards every
/// caller shares the same instance, which keeps token counts identical
/// across the server and worker processes.
fn bpe() -> Result<&'static CoreBPE, AppError> {
    static BPE: OnceLock<Result<CoreBPE, String>> = OnceLock::new();

    match BPE.get_or_init(|| {
        cl100k_base().map_err(|e| format!("failed to initialize cl100k encoder: {e}"))
    }) {
        Ok(encoder) => Ok(encoder),
        Err(err) => Err(AppError::terminal("TOKENIZER_INIT", err.clone())),
    }
}

pub fn encode(text: &str) -> Result<Vec<u32>, AppError> {
    Ok(bpe()?.encode_ordinary(text))
}

pub fn decode(tokens: &[u32]) -> Result<String, AppError> {
    bpe()?
        .decode(tokens.to_vec())
        .map_err(|e| AppError::Integrity(format!("token sequence did not decode to UTF-8: {e}")))
}

pub fn count(text: &str) -> Result<usize, AppError> {
    Ok(encode(text)?.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_round_trip() {
        let text = "We decided to ship on 2024-04-01. — Alice";
        let tokens = encode(text).expect("encode");
        assert!(!tokens.is_empty());
        let decoded = decode(&tokens).expect("decode");
        assert_eq!(decoded, text);
    }

    #[test]
    fn encoding_is_deterministic() {
        let text = "the same input yields the same token ids";
        let first = encode(text).expect("encode once");
        let second = encode(text).expect("encode twice");
        assert_eq!(first, second);
        assert_eq!(count(text).expect("count"), first.len());
    }

    #[test]
    fn prefix_decoding_is_byte_faithful() {
        let text = "alpha beta gamma delta epsilon zeta eta theta";
        let tokens = encode(text).expect("encode");
        for cut in 0..=tokens.len() {
            let prefix = decode(&tokens[..cut]).expect("decode prefix");
            assert!(text.as_bytes().starts_with(prefix.as_bytes()));
        }
    }
}
