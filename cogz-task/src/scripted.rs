//! A scripted choice-reaction task.
//!
//! Each trial puts a stimulus chunk into the `visual` buffer and waits for a
//! key press. The response time is measured from stimulus onset to the
//! moment the key press is reported. The next stimulus appears
//! `inter_trial` seconds after the response. Correct and incorrect
//! responses can deliver rewards to the utility learner.

use std::collections::BTreeMap;

use cogz_core::chunk::Chunk;
use cogz_core::event::Time;
use cogz_core::symbol::sym;
use cogz_core::task::{Task, TaskContext};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// One stimulus and the key that answers it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trial {
    /// Stimulus slots, `slot value slot value ...`.
    pub stimulus: String,
    /// The correct key.
    pub key: char,
}

/// A scored response.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Trial index.
    pub trial: usize,
    /// Key pressed.
    pub key: char,
    /// Seconds from onset to the key press.
    pub rt: Time,
    /// Whether the key was the expected one.
    pub correct: bool,
}

/// Presents [`Trial`]s one after another.
#[derive(Debug, Clone)]
pub struct ScriptedTask {
    trials: Vec<Trial>,
    inter_trial: Time,
    rewards: Option<(f64, f64)>,
    current: Option<usize>,
    onset: Time,
    next_onset: Option<Time>,
    pressed: Option<char>,
    responses: Vec<Response>,
}

impl ScriptedTask {
    /// A task over `trials` with one second between trials.
    #[must_use]
    pub fn new(trials: Vec<Trial>) -> Self {
        Self {
            trials,
            inter_trial: 1.0,
            rewards: None,
            current: None,
            onset: 0.0,
            next_onset: None,
            pressed: None,
            responses: Vec::new(),
        }
    }

    /// Seconds from a response to the next stimulus.
    #[must_use]
    pub fn with_inter_trial(mut self, seconds: Time) -> Self {
        self.inter_trial = seconds;
        self
    }

    /// Reward delivered after correct and incorrect responses.
    #[must_use]
    pub fn with_rewards(mut self, correct: f64, incorrect: f64) -> Self {
        self.rewards = Some((correct, incorrect));
        self
    }

    /// Responses so far.
    #[must_use]
    pub fn responses(&self) -> &[Response] {
        &self.responses
    }

    fn present(&mut self, index: usize, ctx: &mut TaskContext<'_>) {
        let Some(trial) = self.trials.get(index) else {
            return;
        };
        let mut chunk = Chunk::new(ctx.symbols.fresh("stimulus"));
        let tokens: Vec<&str> = trial.stimulus.split_whitespace().collect();
        for pair in tokens.chunks_exact(2) {
            let slot = ctx.symbols.intern(pair[0]);
            let value = ctx.symbols.intern(pair[1]);
            chunk.set(slot, value);
        }
        debug!(trial = index, stimulus = %trial.stimulus, time = ctx.now, "stimulus shown");
        ctx.set_buffer(sym::VISUAL, chunk);
        self.current = Some(index);
        self.onset = ctx.now;
        self.next_onset = None;
    }

    fn score(&mut self, key: char, ctx: &mut TaskContext<'_>) {
        let Some(trial) = self.current.take() else {
            debug!(%key, "key press with no stimulus showing");
            return;
        };
        let correct = self.trials.get(trial).is_some_and(|t| t.key == key);
        self.responses.push(Response {
            trial,
            key,
            rt: ctx.now - self.onset,
            correct,
        });
        if let Some((right, wrong)) = self.rewards {
            ctx.reward(if correct { right } else { wrong });
        }
        if trial + 1 < self.trials.len() {
            self.next_onset = Some(ctx.now + self.inter_trial);
            ctx.schedule_update(self.inter_trial);
        }
    }
}

impl Task for ScriptedTask {
    fn start(&mut self, ctx: &mut TaskContext<'_>) {
        self.present(0, ctx);
    }

    fn update(&mut self, now: Time, ctx: &mut TaskContext<'_>) {
        if let Some(key) = self.pressed.take() {
            self.score(key, ctx);
        }
        if let Some(onset) = self.next_onset {
            if now >= onset {
                let next = self.responses.last().map_or(0, |r| r.trial + 1);
                self.present(next, ctx);
            }
        }
    }

    fn type_key(&mut self, key: char) {
        self.pressed = Some(key);
    }

    fn results(&self) -> BTreeMap<String, f64> {
        let mut out = BTreeMap::from([("trials".to_owned(), self.responses.len() as f64)]);
        if !self.responses.is_empty() {
            let n = self.responses.len() as f64;
            let rt = self.responses.iter().map(|r| r.rt).sum::<f64>() / n;
            let correct = self.responses.iter().filter(|r| r.correct).count() as f64;
            out.insert("rt".to_owned(), rt);
            out.insert("accuracy".to_owned(), correct / n);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trials() -> Vec<Trial> {
        vec![
            Trial {
                stimulus: "value a".to_owned(),
                key: 'a',
            },
            Trial {
                stimulus: "value b".to_owned(),
                key: 'b',
            },
        ]
    }

    #[test]
    fn results_before_any_response() {
        let task = ScriptedTask::new(trials());
        let results = task.results();
        assert_eq!(results.get("trials"), Some(&0.0));
        assert!(!results.contains_key("rt"));
    }

    #[test]
    fn trial_spec_reads_from_toml() {
        let trial: Trial = toml::from_str("stimulus = \"value a\"\nkey = \"a\"").expect("trial");
        assert_eq!(trial.key, 'a');
    }
}
