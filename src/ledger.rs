//! Token ledger for a single experiment.
//!
//! The provider reports how many tokens are left in the current throttling
//! window after every call. Between two consecutive observations the counter
//! should drop by at most the tokens billed for the call in between; a larger
//! drop means the window was charged for something this experiment did not
//! send.

use async_openai::types::CompletionUsage;
use reqwest::header::HeaderMap;

use crate::experiment::ExperimentError;

pub const REMAINING_TOKENS_HEADER: &str = "x-ratelimit-remaining-tokens";
pub const REMAINING_REQUESTS_HEADER: &str = "x-ratelimit-remaining-requests";

/// Rate-limit headers and billed usage observed for one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitSnapshot {
    pub remaining_tokens:   u64,
    pub remaining_requests: u64,
    pub total_tokens:       u64,
    pub prompt_tokens:      u64,
    pub completion_tokens:  u64,
}

impl RateLimitSnapshot {
    pub fn from_parts(headers: &HeaderMap, usage: &CompletionUsage) -> Result<Self, ExperimentError> {
        Ok(Self {
            remaining_tokens:   parse_counter(headers, REMAINING_TOKENS_HEADER)?,
            remaining_requests: parse_counter(headers, REMAINING_REQUESTS_HEADER)?,
            total_tokens:       u64::from(usage.total_tokens),
            prompt_tokens:      u64::from(usage.prompt_tokens),
            completion_tokens:  u64::from(usage.completion_tokens),
        })
    }
}

fn parse_counter(headers: &HeaderMap, name: &str) -> Result<u64, ExperimentError> {
    let value = headers
        .get(name)
        .ok_or_else(|| ExperimentError::MalformedResponse(format!("missing header {name}")))?;
    let text = value
        .to_str()
        .map_err(|_| ExperimentError::MalformedResponse(format!("unreadable header {name}")))?;
    text.trim().parse::<u64>().map_err(|_| {
        ExperimentError::MalformedResponse(format!("header {name} is not an integer: {text:?}"))
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// First observation of the experiment; nothing to compare against.
    NotApplicable,
    Consistent,
    /// The window lost more tokens than the call billed.
    OverDiscounted,
}

/// Result of comparing one observation against the previous one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reconciliation {
    /// Remaining tokens before the call, observed or inferred.
    pub tokens_before: u64,
    /// Drop in the remaining-tokens counter. Negative when the window reset
    /// between the two calls.
    pub discounted:    Option<i64>,
    pub verdict:       Verdict,
}

#[derive(Debug, Default)]
pub struct TokenLedger {
    previous_remaining: Option<u64>,
}

impl TokenLedger {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn previous_remaining(&self) -> Option<u64> {
        self.previous_remaining
    }

    pub fn reconcile(&mut self, snapshot: &RateLimitSnapshot) -> Reconciliation {
        let reconciliation = match self.previous_remaining {
            // Assumes this call was the window's only consumer since it last
            // reset. Wrong when another client shares the quota.
            None => Reconciliation {
                tokens_before: snapshot
                    .remaining_tokens
                    .saturating_add(snapshot.total_tokens),
                discounted:    None,
                verdict:       Verdict::NotApplicable,
            },
            Some(previous) => {
                let discounted = signed(previous) - signed(snapshot.remaining_tokens);
                let verdict = if discounted > signed(snapshot.total_tokens) {
                    Verdict::OverDiscounted
                } else {
                    Verdict::Consistent
                };
                Reconciliation {
                    tokens_before: previous,
                    discounted: Some(discounted),
                    verdict,
                }
            }
        };

        self.previous_remaining = Some(snapshot.remaining_tokens);
        reconciliation
    }
}

fn signed(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}
