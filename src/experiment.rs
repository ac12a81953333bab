use std::time::Duration;

use async_openai::types::CompletionUsage;
use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::{
    clock::Clock,
    ledger::{RateLimitSnapshot, TokenLedger, Verdict},
    model::{ExperimentSpec, Outcome},
    reporter::{Event, EventSink},
    transport::{RawResponse, Transport, build_request},
};

/// Reasons an experiment stops before its time budget runs out. None of them
/// abort the rest of the matrix.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExperimentError {
    #[error("rate limit exceeded (HTTP 429)")]
    Throttled,
    #[error("provider error: {0}")]
    Provider(String),
    #[error("malformed response: {0}")]
    MalformedResponse(String),
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("could not build request: {0}")]
    Request(String),
}

#[derive(Debug, Deserialize)]
struct ResponseBody {
    #[serde(default)]
    error: Option<serde_json::Value>,
    #[serde(default)]
    usage: Option<CompletionUsage>,
}

/// Turns one raw response into a snapshot, or the reason the experiment ends.
pub fn read_response(response: &RawResponse) -> Result<RateLimitSnapshot, ExperimentError> {
    if response.status == StatusCode::TOO_MANY_REQUESTS {
        return Err(ExperimentError::Throttled);
    }

    let body: ResponseBody = serde_json::from_str(&response.body).map_err(|err| {
        ExperimentError::MalformedResponse(format!(
            "HTTP {} with unreadable body: {err}",
            response.status
        ))
    })?;

    if let Some(error) = body.error {
        let message = error
            .get("message")
            .and_then(|message| message.as_str())
            .map(str::to_owned)
            .unwrap_or_else(|| error.to_string());
        return Err(ExperimentError::Provider(message));
    }

    let usage = body
        .usage
        .ok_or_else(|| ExperimentError::MalformedResponse("body has no usage".to_string()))?;

    RateLimitSnapshot::from_parts(&response.headers, &usage)
}

/// Calls `spec`'s endpoint back to back until `time_budget` is spent, or
/// until the endpoint throttles or errors.
pub async fn run_experiment<T: Transport, C: Clock>(
    spec: &ExperimentSpec,
    transport: &T,
    clock: &C,
    time_budget: Duration,
    events: &EventSink,
) -> Outcome {
    let request = match build_request(spec.endpoint(), spec.prompt(), spec.max_tokens()) {
        Ok(request) => request,
        Err(reason) => return Outcome::Failed { calls: 0, reason },
    };

    let mut ledger = TokenLedger::new();
    let started = clock.now();
    let mut calls = 0;

    while clock.now().saturating_duration_since(started) < time_budget {
        calls += 1;

        let observed = match transport.send(spec.endpoint(), &request).await {
            Ok(response) => read_response(&response),
            Err(err) => Err(err),
        };
        let snapshot = match observed {
            Ok(snapshot) => snapshot,
            Err(reason) => {
                warn!(
                    endpoint = spec.endpoint(),
                    experiment = spec.name(),
                    calls,
                    error = %reason,
                    "experiment.failed"
                );
                return Outcome::Failed { calls, reason };
            }
        };

        let reconciliation = ledger.reconcile(&snapshot);
        if reconciliation.verdict == Verdict::OverDiscounted {
            warn!(
                endpoint = spec.endpoint(),
                discounted = ?reconciliation.discounted,
                billed = snapshot.total_tokens,
                "ledger.over_discounted"
            );
        } else {
            debug!(
                endpoint = spec.endpoint(),
                remaining_tokens = snapshot.remaining_tokens,
                verdict = ?reconciliation.verdict,
                "ledger.observed"
            );
        }

        events.emit(Event::CallObserved {
            endpoint: spec.endpoint().to_string(),
            snapshot,
            reconciliation,
        });
    }

    Outcome::Succeeded { calls }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::sync::mpsc;

    use super::*;
    use crate::{
        clock::manual::ManualClock,
        ledger::Reconciliation,
        model::SizedPrompt,
        transport::scripted::{ScriptedTransport, error_response, ok_response, throttled_response},
    };

    const BUDGET: Duration = Duration::from_secs(20);
    const LATENCY: Duration = Duration::from_secs(5);

    fn spec(max_tokens: Option<u32>) -> ExperimentSpec {
        let prompt = SizedPrompt {
            label:  "small".to_string(),
            tokens: 100,
            text:   Arc::from("Who's there?"),
        };
        ExperimentSpec::new("gpt-35-turbo-0613", "small_prompt_no_max_tokens", &prompt, max_tokens)
    }

    fn observed_reconciliations(rx: &mut mpsc::UnboundedReceiver<Event>) -> Vec<Reconciliation> {
        let mut seen = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let Event::CallObserved { reconciliation, .. } = event {
                seen.push(reconciliation);
            }
        }
        seen
    }

    #[tokio::test]
    async fn throttled_first_call_fails_without_further_calls() {
        let clock = ManualClock::new();
        let transport = ScriptedTransport::new(clock.clone(), LATENCY);
        transport.push(throttled_response()).push(ok_response(1_000, 100));

        let outcome =
            run_experiment(&spec(None), &transport, &clock, BUDGET, &EventSink::disabled()).await;

        assert_eq!(
            outcome,
            Outcome::Failed {
                calls:  1,
                reason: ExperimentError::Throttled,
            }
        );
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn surviving_the_budget_succeeds_and_reconciles_every_call() {
        let clock = ManualClock::new();
        let transport = ScriptedTransport::new(clock.clone(), LATENCY);
        transport
            .push(ok_response(1_000, 100))
            .push(ok_response(850, 100))
            .push(ok_response(700, 150))
            .push(ok_response(600, 100));
        let (tx, mut rx) = mpsc::unbounded_channel();

        let outcome =
            run_experiment(&spec(Some(100)), &transport, &clock, BUDGET, &EventSink::new(tx)).await;

        assert_eq!(outcome, Outcome::Succeeded { calls: 4 });
        let verdicts: Vec<_> = observed_reconciliations(&mut rx)
            .iter()
            .map(|r| r.verdict)
            .collect();
        assert_eq!(
            verdicts,
            vec![
                Verdict::NotApplicable,
                Verdict::OverDiscounted,
                Verdict::Consistent,
                Verdict::Consistent,
            ]
        );
    }

    #[tokio::test]
    async fn provider_error_body_fails_the_experiment() {
        let clock = ManualClock::new();
        let transport = ScriptedTransport::new(clock.clone(), LATENCY);
        transport
            .push(ok_response(1_000, 100))
            .push(error_response("The model `gpt-5` does not exist"));

        let outcome =
            run_experiment(&spec(None), &transport, &clock, BUDGET, &EventSink::disabled()).await;

        assert_eq!(
            outcome,
            Outcome::Failed {
                calls:  2,
                reason: ExperimentError::Provider("The model `gpt-5` does not exist".to_string()),
            }
        );
    }

    #[tokio::test]
    async fn missing_rate_limit_headers_fail_without_panicking() {
        let clock = ManualClock::new();
        let transport = ScriptedTransport::new(clock.clone(), LATENCY);
        let mut response = ok_response(1_000, 100);
        response.headers.clear();
        transport.push(response);

        let outcome =
            run_experiment(&spec(None), &transport, &clock, BUDGET, &EventSink::disabled()).await;

        assert!(matches!(
            outcome,
            Outcome::Failed {
                calls:  1,
                reason: ExperimentError::MalformedResponse(_),
            }
        ));
    }

    #[tokio::test]
    async fn transport_failure_fails_the_experiment() {
        let clock = ManualClock::new();
        let transport = ScriptedTransport::new(clock.clone(), LATENCY);

        let outcome =
            run_experiment(&spec(None), &transport, &clock, BUDGET, &EventSink::disabled()).await;

        assert!(matches!(
            outcome,
            Outcome::Failed {
                reason: ExperimentError::Transport(_),
                ..
            }
        ));
    }

    #[test]
    fn non_json_body_is_malformed() {
        let mut response = ok_response(1_000, 100);
        response.body = "<html>gateway timeout</html>".to_string();

        assert!(matches!(
            read_response(&response),
            Err(ExperimentError::MalformedResponse(_))
        ));
    }
}
