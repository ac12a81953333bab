use std::time::Duration;

use owo_colors::{OwoColorize, Stream};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

use crate::{
    ledger::{RateLimitSnapshot, Reconciliation, Verdict},
    model::{ExperimentSpec, Outcome},
};

/// Progress events emitted by the harness for console reporting.
#[derive(Debug, Clone)]
pub enum Event {
    CooldownWait {
        endpoint: String,
        nap:      Duration,
    },
    ExperimentStarted {
        name:          String,
        endpoint:      String,
        prompt_tokens: u32,
        max_tokens:    Option<u32>,
    },
    CallObserved {
        endpoint:       String,
        snapshot:       RateLimitSnapshot,
        reconciliation: Reconciliation,
    },
    ExperimentFinished {
        name:     String,
        endpoint: String,
        outcome:  Outcome,
    },
    MatrixFinished {
        rows: Vec<SummaryRow>,
    },
}

/// Sending half handed to whoever produces events. A disabled sink drops them.
#[derive(Debug, Clone, Default)]
pub struct EventSink(Option<UnboundedSender<Event>>);

impl EventSink {
    pub fn new(sender: UnboundedSender<Event>) -> Self {
        Self(Some(sender))
    }

    #[cfg(test)]
    pub fn disabled() -> Self {
        Self(None)
    }

    pub fn emit(&self, event: Event) {
        if let Some(sender) = &self.0 {
            let _ = sender.send(event);
        }
    }
}

/// One line of the end-of-run table.
#[derive(Debug, Clone)]
pub struct SummaryRow {
    pub endpoint: String,
    pub name:     String,
    pub outcome:  Option<Outcome>,
}

impl SummaryRow {
    pub fn from_spec(spec: &ExperimentSpec) -> Self {
        Self {
            endpoint: spec.endpoint().to_string(),
            name:     spec.name().to_string(),
            outcome:  spec.outcome().cloned(),
        }
    }
}

/// Console reporter. Owns stdout for the lifetime of the run.
#[derive(Debug, Default)]
pub struct Reporter;

impl Reporter {
    pub fn new() -> Self {
        Self
    }

    /// Prints events until the matrix is reported finished or every sender
    /// is gone.
    pub async fn run(self, mut rx: UnboundedReceiver<Event>) {
        while let Some(event) = rx.recv().await {
            let finished = matches!(event, Event::MatrixFinished { .. });
            println!("{}", self.render(&event));
            if finished {
                break;
            }
        }
    }

    pub fn render(&self, event: &Event) -> String {
        match event {
            Event::CooldownWait { endpoint, nap } => format!(
                "Sleeping for {:.1} seconds to respect the cooldown on {}",
                nap.as_secs_f64(),
                endpoint
            ),
            Event::ExperimentStarted {
                name,
                endpoint,
                prompt_tokens,
                max_tokens,
            } => {
                let limit = max_tokens.map_or_else(|| "None".to_string(), |n| n.to_string());
                format!(
                    "Starting experiment {name} on {} with {} and {}",
                    green(endpoint),
                    green(&format!("prompt_size=={prompt_tokens}")),
                    green(&format!("max_tokens=={limit}"))
                )
            }
            Event::CallObserved {
                endpoint,
                snapshot,
                reconciliation,
            } => render_call(endpoint, snapshot, reconciliation),
            Event::ExperimentFinished {
                name,
                endpoint,
                outcome,
            } => match outcome {
                Outcome::Succeeded { calls } => format!(
                    "Experiment {name} on {endpoint} {} after {calls} calls\n",
                    green("survived its time budget")
                ),
                Outcome::Failed { calls, reason } => format!(
                    "Experiment {name} on {endpoint} {} after {calls} calls: {reason}\n",
                    red("terminated")
                ),
            },
            Event::MatrixFinished { rows } => render_summary(rows),
        }
    }
}

fn render_call(endpoint: &str, snapshot: &RateLimitSnapshot, reconciliation: &Reconciliation) -> String {
    let discounted = match reconciliation.discounted {
        Some(tokens) => format!("{tokens:>5}"),
        None => format!("{:>5}", "NA"),
    };
    let discounted = format!("Discounted tokens for thr. {discounted}");
    let discounted = match reconciliation.verdict {
        Verdict::OverDiscounted => red(&discounted),
        Verdict::Consistent => green(&discounted),
        Verdict::NotApplicable => discounted,
    };

    format!(
        "Model {} - Remaining requests for thr. {:>3} - Remaining tokens for thr. before {:>6} - \
         Remaining tokens for thr. now: {:>6} - {} ----- Total tokens in call: {} == (Prompt \
         tokens {:>4} + Response tokens {:>4})",
        green(endpoint),
        snapshot.remaining_requests,
        reconciliation.tokens_before,
        snapshot.remaining_tokens,
        discounted,
        blue(&format!("{:>4}", snapshot.total_tokens)),
        snapshot.prompt_tokens,
        snapshot.completion_tokens,
    )
}

/// Table of every experiment with its outcome, in matrix order.
pub fn render_summary(rows: &[SummaryRow]) -> String {
    let endpoint_width = rows.iter().map(|r| r.endpoint.len()).max().unwrap_or(0).max(8);
    let name_width = rows.iter().map(|r| r.name.len()).max().unwrap_or(0).max(10);

    let mut output = format!(
        "{:<endpoint_width$}  {:<name_width$}  {:<8}  {:>5}  reason\n",
        "endpoint", "experiment", "outcome", "calls"
    );

    let mut failures = 0;
    for row in rows {
        let (label, calls, reason) = match &row.outcome {
            Some(outcome @ Outcome::Failed { reason, .. }) => {
                failures += 1;
                (outcome.label(), outcome.calls(), reason.to_string())
            }
            Some(outcome) => (outcome.label(), outcome.calls(), String::new()),
            None => ("Pending", 0, String::new()),
        };
        let label = format!("{label:<8}");
        let label = match &row.outcome {
            Some(outcome) if outcome.is_success() => green(&label),
            Some(_) => red(&label),
            None => label,
        };
        output.push_str(&format!(
            "{:<endpoint_width$}  {:<name_width$}  {}  {:>5}  {}\n",
            row.endpoint, row.name, label, calls, reason
        ));
    }

    output.push_str(&format!(
        "{} experiments, {} failed",
        rows.len(),
        failures
    ));
    output
}

fn green(text: &str) -> String {
    text.if_supports_color(Stream::Stdout, |t| t.green()).to_string()
}

fn red(text: &str) -> String {
    text.if_supports_color(Stream::Stdout, |t| t.red()).to_string()
}

fn blue(text: &str) -> String {
    text.if_supports_color(Stream::Stdout, |t| t.blue()).to_string()
}
