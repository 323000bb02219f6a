use common::{
    error::AppError,
    utils::{ids, tokenizer},
};

/// A token window over a revision's content.
///
/// Offsets are byte offsets into the decoded text. Token decoding is a
/// concatenation of per-token byte sequences, so `content[start..end]`
/// reproduces the chunk content exactly.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub id: String,
    pub index: usize,
    pub content: String,
    pub start_char: usize,
    pub end_char: usize,
    pub token_count: usize,
    pub content_hash: String,
}

#[derive(Debug, Clone, Copy)]
pub struct Chunker {
    single_piece_max: usize,
    chunk_target: usize,
    chunk_overlap: usize,
}

impl Chunker {
    pub fn new(
        single_piece_max: usize,
        chunk_target: usize,
        chunk_overlap: usize,
    ) -> Result<Self, AppError> {
        if chunk_target == 0 {
            return Err(AppError::validation(
                "INVALID_PARAMETER",
                "chunk_target_tokens must be positive",
            ));
        }
        if chunk_overlap >= chunk_target {
            return Err(AppError::validation(
                "INVALID_PARAMETER",
                format!(
                    "chunk_overlap_tokens ({chunk_overlap}) must be smaller than chunk_target_tokens ({chunk_target})"
                ),
            ));
        }

        Ok(Self {
            single_piece_max,
            chunk_target,
            chunk_overlap,
        })
    }

    pub fn from_config(config: &common::utils::config::AppConfig) -> Result<Self, AppError> {
        Self::new(
            config.single_piece_max_tokens,
            config.chunk_target_tokens,
            config.chunk_overlap_tokens,
        )
    }

    /// True iff the text exceeds the single-piece threshold; also returns
    /// the token count so callers tokenize once.
    pub fn should_chunk(&self, text: &str) -> Result<(bool, usize), AppError> {
        let count = tokenizer::count(text)?;
        Ok((count > self.single_piece_max, count))
    }

    /// Split into sliding token windows of `chunk_target` tokens, advancing
    /// `chunk_target - chunk_overlap` per step. Returns an empty list when
    /// the text fits in a single piece.
    pub fn chunk(&self, text: &str, artifact_id: &str) -> Result<Vec<Chunk>, AppError> {
        let tokens = tokenizer::encode(text)?;
        if tokens.len() <= self.single_piece_max {
            return Ok(Vec::new());
        }

        let step = self.chunk_target - self.chunk_overlap;
        let mut chunks = Vec::new();
        let mut pos = 0usize;
        let mut index = 0usize;

        while pos < tokens.len() {
            let end = (pos + self.chunk_target).min(tokens.len());
            let window = &tokens[pos..end];
            let content = tokenizer::decode(window)?;
            let start_char = tokenizer::decode(&tokens[..pos])?.len();
            let end_char = start_char + content.len();

            chunks.push(Chunk {
                id: ids::chunk_id(artifact_id, index, &content),
                index,
                content_hash: ids::content_hash(&content),
                token_count: window.len(),
                content,
                start_char,
                end_char,
            });

            pos += step;
            index += 1;
        }

        Ok(chunks)
    }
}
