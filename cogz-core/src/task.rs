//! The task collaborator: the simulated environment a model acts in.
//!
//! The engine knows nothing about a task's behavior. It calls
//! [`Task::start`] once, [`Task::update`] after every executed event, routes
//! motor and perceptual commands to the corresponding callbacks, and falls
//! back to [`Task::eval`] / [`Task::eval_condition`] / [`Task::bind`] for
//! embedded expressions the built-in evaluator cannot handle.

use std::collections::BTreeMap;

use crate::buffer::Buffers;
use crate::chunk::Chunk;
use crate::event::{Event, EventAction, EventQueue, ModuleKind, Time};
use crate::symbol::{Interner, Symbol};

/// What a task may touch during `start` / `update`.
pub struct TaskContext<'a> {
    /// Current simulated time.
    pub now: Time,
    /// Model buffers.
    pub buffers: &'a mut Buffers,
    /// Event schedule.
    pub events: &'a mut EventQueue,
    /// Interner.
    pub symbols: &'a mut Interner,
    pub(crate) reward: &'a mut Option<f64>,
    pub(crate) stop: &'a mut bool,
}

impl TaskContext<'_> {
    /// Ask for another `update` call `delay` seconds from now.
    pub fn schedule_update(&mut self, delay: Time) {
        self.events.schedule(Event::new(
            self.now + delay,
            ModuleKind::Task,
            "task-update",
            EventAction::TaskUpdate,
        ));
    }

    /// Place `chunk` into `buffer` (a stimulus appearing, say).
    pub fn set_buffer(&mut self, buffer: Symbol, chunk: Chunk) {
        self.buffers.set(buffer, chunk, self.now);
    }

    /// Deliver a reward to the utility learner. Rewards within one step add up.
    pub fn reward(&mut self, value: f64) {
        *self.reward = Some(self.reward.unwrap_or(0.0) + value);
    }

    /// Halt the run after this step.
    pub fn stop(&mut self) {
        *self.stop = true;
    }
}

/// An embedding environment.
///
/// Every method has a no-op default so a task implements only what it uses.
pub trait Task {
    /// Called once before the first event.
    fn start(&mut self, _ctx: &mut TaskContext<'_>) {}

    /// Called after every executed event.
    fn update(&mut self, _now: Time, _ctx: &mut TaskContext<'_>) {}

    /// A key press finished.
    fn type_key(&mut self, _key: char) {}

    /// The mouse moved.
    fn move_mouse(&mut self, _x: f64, _y: f64) {}

    /// Visual attention shifted.
    fn move_attention(&mut self, _x: f64, _y: f64) {}

    /// The eyes moved.
    fn move_eye(&mut self, _x: f64, _y: f64) {}

    /// An utterance finished.
    fn speak(&mut self, _text: &str) {}

    /// A mouse click finished.
    fn click_mouse(&mut self) {}

    /// Run an embedded side effect. Returns `false` if not understood.
    fn eval(&mut self, _tokens: &[String]) -> bool {
        false
    }

    /// Evaluate an embedded test. `None` if not understood.
    fn eval_condition(&mut self, _tokens: &[String]) -> Option<bool> {
        None
    }

    /// Evaluate an embedded binding expression. `None` if not understood.
    fn bind(&mut self, _tokens: &[String]) -> Option<String> {
        None
    }

    /// Named measurements of this run.
    fn results(&self) -> BTreeMap<String, f64> {
        BTreeMap::new()
    }

    /// Batch statistics over several finished runs; the mean of each
    /// measurement by default.
    fn analyze(&self, instances: &[Box<dyn Task>]) -> BTreeMap<String, f64> {
        mean_results(instances)
    }
}

/// Mean of every named result over `instances` (missing names are skipped).
#[must_use]
pub fn mean_results(instances: &[Box<dyn Task>]) -> BTreeMap<String, f64> {
    let mut sums: BTreeMap<String, (f64, u32)> = BTreeMap::new();
    for instance in instances {
        for (name, value) in instance.results() {
            let entry = sums.entry(name).or_insert((0.0, 0));
            entry.0 += value;
            entry.1 += 1;
        }
    }
    sums.into_iter()
        .map(|(name, (sum, n))| (name, sum / f64::from(n)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(f64);

    impl Task for Fixed {
        fn results(&self) -> BTreeMap<String, f64> {
            BTreeMap::from([("rt".to_owned(), self.0)])
        }
    }

    #[test]
    fn default_analysis_averages_results() {
        let runs: Vec<Box<dyn Task>> = vec![Box::new(Fixed(1.0)), Box::new(Fixed(3.0))];
        let stats = runs[0].analyze(&runs);
        assert!((stats["rt"] - 2.0).abs() < 1e-12);
    }

    #[test]
    fn context_accumulates_rewards_and_schedules_updates() {
        let mut buffers = Buffers::new();
        let mut events = EventQueue::new();
        let mut symbols = Interner::new();
        let mut reward = None;
        let mut stop = false;
        let mut ctx = TaskContext {
            now: 1.0,
            buffers: &mut buffers,
            events: &mut events,
            symbols: &mut symbols,
            reward: &mut reward,
            stop: &mut stop,
        };
        ctx.reward(2.0);
        ctx.reward(0.5);
        ctx.schedule_update(0.25);
        ctx.stop();
        assert_eq!(reward, Some(2.5));
        assert!(stop);
        assert_eq!(events.peek_time(), Some(1.25));
    }
}
