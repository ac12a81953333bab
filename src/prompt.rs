use std::sync::Arc;

use thiserror::Error;
use unicode_segmentation::UnicodeSegmentation;

use crate::model::{PromptSize, SizedPrompt};

/// Short phrase repeated to build prompts too small for the corpus template.
pub const FILLER_PHRASE: &str = "Hello llm model, how are you doing today my dear friend? ";

/// Token budget credited to one copy of [`FILLER_PHRASE`].
pub const FILLER_PHRASE_TOKENS: u32 = 20;

/// Targets below this use the filler phrase instead of the corpus.
pub const FILLER_THRESHOLD: u32 = 4 * FILLER_PHRASE_TOKENS;

const PROMPT_HEADER: &str = "
You are a literature expert. Indicate the author and book of the following text:
######START OF TEXT#######
";

const PROMPT_FOOTER: &str = r#"
######END OF TEXT#######
Write an output in JSON with the following structure
{
    "author": "Author name",
    "book": "Book name"
}
"#;

/// Tokens glued to the preceding text when rebuilding a sentence.
const ATTACHED_PUNCTUATION: [&str; 15] = [
    ",", ".", ":", ";", "!", "?", ")", "[", "]", "{", "}", "<", ">", "'", "\"",
];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SizerError {
    #[error("prompt size {target} must be greater than the template overhead of {overhead} tokens")]
    InvalidSize { target: u32, overhead: u32 },
    #[error("no reference corpus loaded for long prompts")]
    MissingCorpus,
    #[error("reference corpus has {available} tokens but {needed} are required")]
    CorpusTooShort { needed: usize, available: usize },
}

/// Splits text into words and punctuation marks, dropping whitespace.
pub fn tokenize(text: &str) -> Vec<&str> {
    text.split_word_bounds()
        .filter(|segment| !segment.trim().is_empty())
        .collect()
}

/// Joins tokens back into readable text.
pub fn detokenize<S: AsRef<str>>(tokens: &[S]) -> String {
    let mut sentence = String::new();

    for (i, token) in tokens.iter().enumerate() {
        let token = token.as_ref();
        if ATTACHED_PUNCTUATION.contains(&token) {
            sentence.truncate(sentence.trim_end().len());
            sentence.push_str(token);
        } else {
            if i > 0 {
                sentence.push(' ');
            }
            sentence.push_str(token);
        }
    }

    sentence
}

/// Builds prompt text of a requested token length.
#[derive(Debug, Clone, Default)]
pub struct PromptSizer {
    corpus: Option<Vec<String>>,
}

impl PromptSizer {
    /// Sizer that can only build filler prompts.
    pub fn filler_only() -> Self {
        Self { corpus: None }
    }

    pub fn with_corpus(text: &str) -> Self {
        let corpus = tokenize(text).into_iter().map(str::to_owned).collect();
        Self {
            corpus: Some(corpus),
        }
    }

    pub fn needs_corpus(target_tokens: u32) -> bool {
        target_tokens >= FILLER_THRESHOLD
    }

    /// Token cost of the corpus template's header and footer.
    pub fn overhead() -> u32 {
        let tokens = tokenize(PROMPT_HEADER).len() + tokenize(PROMPT_FOOTER).len();
        tokens as u32
    }

    pub fn build_prompt(&self, target_tokens: u32) -> Result<String, SizerError> {
        if !Self::needs_corpus(target_tokens) {
            let copies = target_tokens / FILLER_PHRASE_TOKENS;
            return Ok(FILLER_PHRASE.repeat(copies as usize));
        }
        self.corpus_prompt(target_tokens)
    }

    /// Wraps the first `target_tokens - overhead - 1` corpus tokens in the
    /// literature-expert template.
    pub fn corpus_prompt(&self, target_tokens: u32) -> Result<String, SizerError> {
        let overhead = Self::overhead();
        if target_tokens <= overhead {
            return Err(SizerError::InvalidSize {
                target: target_tokens,
                overhead,
            });
        }

        let corpus = self.corpus.as_ref().ok_or(SizerError::MissingCorpus)?;
        let needed = (target_tokens - overhead - 1) as usize;
        if corpus.len() < needed {
            return Err(SizerError::CorpusTooShort {
                needed,
                available: corpus.len(),
            });
        }

        let body = detokenize(&corpus[..needed]);
        Ok(format!("{PROMPT_HEADER}{body}{PROMPT_FOOTER}"))
    }

    /// Builds every configured size, failing on the first one that cannot fit.
    pub fn size_all(&self, sizes: &[PromptSize]) -> Result<Vec<SizedPrompt>, SizerError> {
        sizes
            .iter()
            .map(|size| {
                let text = self.build_prompt(size.tokens)?;
                Ok(SizedPrompt {
                    label:  size.label.clone(),
                    tokens: size.tokens,
                    text:   Arc::from(text),
                })
            })
            .collect()
    }
}
