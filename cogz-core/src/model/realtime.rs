//! Wall-clock pacing.
//!
//! An event due at simulated time `t` is executed no earlier than
//! `origin + (t − t₀) · scale` on the tokio clock, where `scale` is
//! `general.realtime_scale` (wall seconds per simulated second). A stop
//! request wakes the wait immediately.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, sleep_until};
use tracing::debug;

use crate::event::Time;

use super::{Model, RunOutcome};

impl Model {
    /// Run for `duration` simulated seconds, paced against the wall clock.
    ///
    /// Returns the same outcomes as [`Model::run`]. On [`RunOutcome::TimeLimit`]
    /// the call returns once the wall clock reaches the end of the window.
    pub async fn run_realtime(&mut self, duration: Time) -> RunOutcome {
        let end = self.time + duration;
        self.start();
        let scale = self.config.general.realtime_scale.max(0.0);
        let origin = Instant::now();
        let sim_origin = self.time;
        let notify = Arc::clone(&self.stop.notify);
        debug!(scale, duration, "real-time run");

        loop {
            if let Some(outcome) = self.interruption() {
                return outcome;
            }
            let Some(next) = self.events.peek_time() else {
                return RunOutcome::Idle;
            };
            let target = next.min(end);
            let due = origin + Duration::from_secs_f64(((target - sim_origin) * scale).max(0.0));
            tokio::select! {
                () = sleep_until(due) => {
                    if next > end {
                        self.time = end;
                        return RunOutcome::TimeLimit;
                    }
                    self.step();
                }
                () = notify.notified() => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::model::{ModelBuilder, ProductionDraft, RunOutcome};
    use crate::trace::NullSink;

    fn looping_model(scale: &str) -> crate::Model {
        ModelBuilder::new()
            .parameter(":seed", "1")
            .parameter(":real-time", scale)
            .chunk("g", "state go")
            .chunk("go", "")
            .goal("g")
            .add_production(
                ProductionDraft::new("again")
                    .when("=goal>", "state go")
                    .then("=goal>", "state go"),
            )
            .trace_sink(NullSink)
            .build()
            .expect("model")
    }

    #[tokio::test(start_paused = true)]
    async fn paces_events_against_the_clock() {
        let mut model = looping_model("1");
        let started = tokio::time::Instant::now();
        let outcome = model.run_realtime(0.5).await;
        assert_eq!(outcome, RunOutcome::TimeLimit);
        assert!((model.time() - 0.5).abs() < 1e-9);
        assert!(started.elapsed() >= std::time::Duration::from_millis(500));
        assert!(model.stats().fired >= 9);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_wakes_a_waiting_run() {
        let mut model = looping_model("10");
        let handle = model.stop_handle();
        let stopper = async {
            tokio::time::sleep(std::time::Duration::from_secs(1)).await;
            handle.stop();
        };
        let (outcome, ()) = tokio::join!(model.run_realtime(100.0), stopper);
        assert_eq!(outcome, RunOutcome::Stopped);
        assert!(model.time() < 1.0);
    }
}
