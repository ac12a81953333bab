use std::time::Duration;

use kameo::{
    Actor,
    message::{Context, Message},
};
use tracing::info;

use crate::{
    clock::Clock,
    cooldown::CooldownScheduler,
    experiment::run_experiment,
    model::{ExperimentSpec, Outcome},
    reporter::{Event, EventSink},
    transport::Transport,
};

/// Message asking the harness to run one experiment to completion.
#[derive(Debug)]
pub struct RunExperiment(pub ExperimentSpec);

/// Actor that owns the cooldown table and runs experiments one at a time.
#[derive(Actor)]
pub struct Harness<T: Transport, C: Clock> {
    transport:   T,
    clock:       C,
    scheduler:   CooldownScheduler,
    time_budget: Duration,
    events:      EventSink,
}

impl<T: Transport, C: Clock> Harness<T, C> {
    pub fn new(
        transport: T,
        clock: C,
        scheduler: CooldownScheduler,
        time_budget: Duration,
        events: EventSink,
    ) -> Self {
        Self {
            transport,
            clock,
            scheduler,
            time_budget,
            events,
        }
    }

    #[cfg(test)]
    pub fn cooldowns(&self) -> &crate::cooldown::CooldownTable {
        self.scheduler.table()
    }

    /// Waits out the endpoint's cooldown, runs the call loop, then stamps the
    /// endpoint whatever the outcome.
    pub async fn run(&mut self, spec: &ExperimentSpec) -> Outcome {
        if let Some(nap) = self.scheduler.wait_for_slot(spec.endpoint(), &self.clock).await {
            self.events.emit(Event::CooldownWait {
                endpoint: spec.endpoint().to_string(),
                nap,
            });
        }

        info!(
            endpoint = spec.endpoint(),
            experiment = spec.name(),
            prompt_tokens = spec.prompt_tokens(),
            max_tokens = ?spec.max_tokens(),
            "experiment.started"
        );
        self.events.emit(Event::ExperimentStarted {
            name:          spec.name().to_string(),
            endpoint:      spec.endpoint().to_string(),
            prompt_tokens: spec.prompt_tokens(),
            max_tokens:    spec.max_tokens(),
        });

        let outcome = run_experiment(
            spec,
            &self.transport,
            &self.clock,
            self.time_budget,
            &self.events,
        )
        .await;

        self.scheduler.stamp(spec.endpoint(), self.clock.now());

        info!(
            endpoint = spec.endpoint(),
            experiment = spec.name(),
            outcome = outcome.label(),
            calls = outcome.calls(),
            "experiment.finished"
        );
        self.events.emit(Event::ExperimentFinished {
            name:     spec.name().to_string(),
            endpoint: spec.endpoint().to_string(),
            outcome:  outcome.clone(),
        });

        outcome
    }
}

impl<T: Transport, C: Clock> Message<RunExperiment> for Harness<T, C> {
    type Reply = Outcome;

    async fn handle(
        &mut self,
        msg: RunExperiment,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        self.run(&msg.0).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        clock::manual::ManualClock,
        experiment::ExperimentError,
        matrix::build_matrix,
        model::{SizedPrompt, TokenLimit},
        transport::scripted::{ScriptedTransport, ok_response, throttled_response},
    };

    const BUDGET: Duration = Duration::from_secs(20);
    const LATENCY: Duration = Duration::from_secs(10);

    fn matrix(endpoints: &[&str], limits: &[Option<u32>]) -> Vec<ExperimentSpec> {
        let endpoints: Vec<String> = endpoints.iter().map(|e| e.to_string()).collect();
        let prompts = vec![SizedPrompt {
            label:  "small".to_string(),
            tokens: 100,
            text:   Arc::from("Who's there?"),
        }];
        let limits: Vec<TokenLimit> = limits
            .iter()
            .enumerate()
            .map(|(i, max_tokens)| TokenLimit {
                label:      format!("limit{i}"),
                max_tokens: *max_tokens,
            })
            .collect();
        build_matrix(&endpoints, &prompts, &limits)
    }

    fn harness(transport: ScriptedTransport, clock: ManualClock) -> Harness<ScriptedTransport, ManualClock> {
        Harness::new(
            transport,
            clock,
            CooldownScheduler::new(Duration::from_secs(60), Duration::from_secs(1)),
            BUDGET,
            EventSink::disabled(),
        )
    }

    #[tokio::test]
    async fn failure_does_not_stop_the_next_experiment() {
        let clock = ManualClock::new();
        let transport = ScriptedTransport::new(clock.clone(), LATENCY);
        transport
            .push(throttled_response())
            .push(ok_response(1_000, 100))
            .push(ok_response(900, 100));
        let mut harness = harness(transport.clone(), clock.clone());
        let specs = matrix(&["gpt-4-0613", "gpt-4o"], &[None]);

        let first = harness.run(&specs[0]).await;
        let second = harness.run(&specs[1]).await;

        assert_eq!(
            first,
            Outcome::Failed {
                calls:  1,
                reason: ExperimentError::Throttled,
            }
        );
        assert_eq!(second, Outcome::Succeeded { calls: 2 });
        assert_eq!(transport.sent_endpoints(), vec!["gpt-4-0613", "gpt-4o", "gpt-4o"]);
        assert!(clock.naps().is_empty(), "different endpoints never wait on each other");
    }

    #[tokio::test]
    async fn every_outcome_stamps_only_its_own_endpoint() {
        let clock = ManualClock::new();
        let transport = ScriptedTransport::new(clock.clone(), LATENCY);
        transport.push(throttled_response());
        let mut harness = harness(transport, clock.clone());
        let specs = matrix(&["gpt-4-0613", "gpt-4o"], &[None]);

        harness.run(&specs[0]).await;

        assert_eq!(harness.cooldowns().len(), 1);
        assert_eq!(harness.cooldowns().last_completion("gpt-4-0613"), Some(clock.now()));
        assert_eq!(harness.cooldowns().last_completion("gpt-4o"), None);
    }

    #[tokio::test]
    async fn same_endpoint_waits_out_its_cooldown() {
        let clock = ManualClock::new();
        let transport = ScriptedTransport::new(clock.clone(), LATENCY);
        transport.push(throttled_response()).push(throttled_response());
        let mut harness = harness(transport, clock.clone());
        let specs = matrix(&["gpt-4-0613"], &[None, Some(100)]);

        harness.run(&specs[0]).await;
        clock.advance(Duration::from_secs(15));
        harness.run(&specs[1]).await;

        assert_eq!(clock.naps(), vec![Duration::from_secs(46)]);
    }

    #[tokio::test]
    async fn actor_replies_with_outcome_in_order() {
        let clock = ManualClock::new();
        let transport = ScriptedTransport::new(clock.clone(), LATENCY);
        transport.push(throttled_response()).push(throttled_response());
        let specs = matrix(&["gpt-4-0613", "gpt-4o"], &[None]);
        let harness_ref = Harness::spawn(harness(transport.clone(), clock));

        for spec in &specs {
            let outcome = harness_ref
                .ask(RunExperiment(spec.clone()))
                .await
                .expect("harness should reply");
            spec.record_outcome(outcome).expect("outcome recorded once");
        }

        assert!(specs.iter().all(|s| s.outcome().is_some_and(|o| !o.is_success())));
        assert_eq!(transport.sent_endpoints(), vec!["gpt-4-0613", "gpt-4o"]);
        harness_ref.stop_gracefully().await.ok();
    }
}
