use std::sync::{Arc, OnceLock};

use serde::{Deserialize, Serialize};

use crate::experiment::ExperimentError;

/// Labelled prompt size, in tokens, as configured.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptSize {
    pub label:  String,
    pub tokens: u32,
}

/// Labelled output cap. `None` means the request carries no `max_tokens`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenLimit {
    pub label:      String,
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

/// A prompt size together with the text built for it.
#[derive(Debug, Clone)]
pub struct SizedPrompt {
    pub label:  String,
    pub tokens: u32,
    pub text:   Arc<str>,
}

/// How an experiment ended. Success means the budget ran out without the
/// endpoint throttling or erroring, nothing more.
#[derive(Debug, Clone, PartialEq, Eq, kameo::Reply)]
pub enum Outcome {
    Succeeded { calls: u32 },
    Failed { calls: u32, reason: ExperimentError },
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Succeeded { .. })
    }

    pub fn calls(&self) -> u32 {
        match self {
            Outcome::Succeeded { calls } | Outcome::Failed { calls, .. } => *calls,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Succeeded { .. } => "Success",
            Outcome::Failed { .. } => "Failure",
        }
    }
}

/// One cell of the experiment matrix.
#[derive(Debug, Clone)]
pub struct ExperimentSpec {
    endpoint:      String,
    name:          String,
    prompt_tokens: u32,
    prompt:        Arc<str>,
    max_tokens:    Option<u32>,
    outcome:       OnceLock<Outcome>,
}

impl ExperimentSpec {
    pub fn new(
        endpoint: impl Into<String>,
        name: impl Into<String>,
        prompt: &SizedPrompt,
        max_tokens: Option<u32>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            name: name.into(),
            prompt_tokens: prompt.tokens,
            prompt: Arc::clone(&prompt.text),
            max_tokens,
            outcome: OnceLock::new(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn prompt_tokens(&self) -> u32 {
        self.prompt_tokens
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn max_tokens(&self) -> Option<u32> {
        self.max_tokens
    }

    pub fn outcome(&self) -> Option<&Outcome> {
        self.outcome.get()
    }

    /// Stores the outcome. An outcome is written once; a second write is
    /// handed back untouched.
    pub fn record_outcome(&self, outcome: Outcome) -> Result<(), Outcome> {
        self.outcome.set(outcome)
    }
}
