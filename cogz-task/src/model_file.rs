//! TOML model files.
//!
//! ```toml
//! goal = "g"
//!
//! [parameters]
//! ":rt" = -1.0
//!
//! [config.procedural]
//! action_time = 0.05
//!
//! [[chunk]]
//! name = "g"
//! slots = "state attend"
//!
//! [[production]]
//! name = "respond"
//! when = [["=goal>", "state attend"], ["=visual>", "value =v"]]
//! then = [["+manual>", "cmd press-key key =v"], ["=goal>", "state done"]]
//! parameters = { ":u" = 2.0 }
//!
//! [task]
//! inter_trial = 1.0
//! trials = [{ stimulus = "value a", key = "a" }]
//! ```
//!
//! Parameter values may be strings, numbers or booleans; they are handed to
//! the same key table as [`ModelBuilder::parameter`].

use std::collections::BTreeMap;
use std::path::Path;

use cogz_core::error::{CogzError, Result};
use cogz_core::{CogzConfig, ModelBuilder, ProductionDraft};
use serde::{Deserialize, Serialize};

use crate::motor::MotorModule;
use crate::scripted::{ScriptedTask, Trial};

/// A chunk type declaration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkTypeSpec {
    /// Type name.
    pub name: String,
    /// Parent types.
    #[serde(default)]
    pub parents: Vec<String>,
}

/// A chunk: `slots` holds `slot value slot value ...`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkSpec {
    /// Chunk name.
    pub name: String,
    /// Slot text.
    #[serde(default)]
    pub slots: String,
}

/// A production as clause-text pairs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductionSpec {
    /// Production name.
    pub name: String,
    /// Condition clauses, `[head, body]`.
    #[serde(default)]
    pub when: Vec<(String, String)>,
    /// Action clauses, `[head, body]`.
    #[serde(default)]
    pub then: Vec<(String, String)>,
    /// `:u`, `:p`, `:reward`, `:break`.
    #[serde(default)]
    pub parameters: BTreeMap<String, toml::Value>,
    /// Source line, for diagnostics.
    #[serde(default)]
    pub line: Option<u32>,
}

/// One similarity entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimilaritySpec {
    /// First chunk.
    pub a: String,
    /// Second chunk.
    pub b: String,
    /// Similarity.
    pub value: f64,
}

/// The scripted choice task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSpec {
    /// Stimuli in order.
    pub trials: Vec<Trial>,
    /// Seconds between a response and the next stimulus.
    #[serde(default = "default_inter_trial")]
    pub inter_trial: f64,
    /// `[correct, incorrect]` rewards.
    #[serde(default)]
    pub rewards: Option<(f64, f64)>,
}

fn default_inter_trial() -> f64 {
    1.0
}

/// A whole model.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelFile {
    /// Base configuration, before `parameters`.
    #[serde(default)]
    pub config: CogzConfig,
    /// ACT-R style global parameters.
    #[serde(default)]
    pub parameters: BTreeMap<String, toml::Value>,
    /// Chunk types.
    #[serde(default, rename = "chunk_type")]
    pub chunk_types: Vec<ChunkTypeSpec>,
    /// Chunks.
    #[serde(default, rename = "chunk")]
    pub chunks: Vec<ChunkSpec>,
    /// Initial goal chunk.
    #[serde(default)]
    pub goal: Option<String>,
    /// Productions.
    #[serde(default, rename = "production")]
    pub productions: Vec<ProductionSpec>,
    /// Similarities.
    #[serde(default, rename = "similarity")]
    pub similarities: Vec<SimilaritySpec>,
    /// Optional scripted task; motor modules are attached with it.
    #[serde(default)]
    pub task: Option<TaskSpec>,
}

impl ModelFile {
    /// Parse a model file from TOML text.
    ///
    /// # Errors
    /// Returns `CogzError::Config` if the text is not a valid model file.
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| CogzError::Config(e.to_string()))
    }

    /// Read and parse a model file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// A builder for this model, with `seed` overriding any configured seed.
    #[must_use]
    pub fn builder(&self, seed: Option<u64>) -> ModelBuilder {
        let mut builder = ModelBuilder::new().config(self.config.clone());
        for (key, value) in &self.parameters {
            builder = builder.parameter(key, &parameter_token(value));
        }
        if let Some(seed) = seed {
            builder = builder.parameter(":seed", &seed.to_string());
        }
        for ty in &self.chunk_types {
            let parents: Vec<&str> = ty.parents.iter().map(String::as_str).collect();
            builder = builder.chunk_type(&ty.name, &parents);
        }
        for chunk in &self.chunks {
            builder = builder.chunk(&chunk.name, &chunk.slots);
        }
        for spec in &self.productions {
            let mut draft = ProductionDraft::new(&spec.name);
            for (head, body) in &spec.when {
                draft = draft.when(head, body);
            }
            for (head, body) in &spec.then {
                draft = draft.then(head, body);
            }
            if let Some(line) = spec.line {
                draft = draft.at(line, 0);
            }
            builder = builder.add_production(draft);
            for (key, value) in &spec.parameters {
                builder = builder.production_parameter(&spec.name, key, &parameter_token(value));
            }
        }
        for s in &self.similarities {
            builder = builder.similarity(&s.a, &s.b, s.value);
        }
        if let Some(goal) = &self.goal {
            builder = builder.goal(goal);
        }
        if let Some(spec) = &self.task {
            let mut task = ScriptedTask::new(spec.trials.clone()).with_inter_trial(spec.inter_trial);
            if let Some((correct, incorrect)) = spec.rewards {
                task = task.with_rewards(correct, incorrect);
            }
            builder = builder
                .task(task)
                .module(MotorModule::manual())
                .module(MotorModule::vocal());
        }
        builder
    }
}

/// Render a TOML value the way the parameter table reads tokens.
fn parameter_token(value: &toml::Value) -> String {
    match value {
        toml::Value::String(s) => s.clone(),
        toml::Value::Boolean(true) => "t".to_owned(),
        toml::Value::Boolean(false) => "nil".to_owned(),
        toml::Value::Integer(i) => i.to_string(),
        toml::Value::Float(f) => f.to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MODEL: &str = r#"
goal = "g"

[parameters]
":rt" = -1.0
":ul" = true
":alpha" = "0.1"

[[chunk]]
name = "g"
slots = "state start"

[[production]]
name = "go"
when = [["=goal>", "state start"]]
then = [["=goal>", "state done"]]
parameters = { ":u" = 3 }
"#;

    #[test]
    fn parses_and_builds() {
        let file = ModelFile::from_toml(MODEL).expect("parse");
        assert_eq!(file.chunks.len(), 1);
        assert_eq!(file.productions[0].when[0].0, "=goal>");

        let mut model = file.builder(Some(3)).build().expect("build");
        assert_eq!(model.config().general.seed, Some(3));
        assert!((model.config().declarative.retrieval_threshold + 1.0).abs() < 1e-12);
        assert!(model.config().procedural.utility_learning);
        assert!((model.config().procedural.learning_rate - 0.1).abs() < 1e-12);
        assert!((model.production("go").expect("go").utility - 3.0).abs() < 1e-12);

        model.run_until_idle();
        assert_eq!(model.buffer_slot("goal", "state"), Some("done"));
    }

    #[test]
    fn tokens_follow_the_parameter_syntax() {
        assert_eq!(parameter_token(&toml::Value::Boolean(false)), "nil");
        assert_eq!(parameter_token(&toml::Value::Integer(4)), "4");
        assert_eq!(parameter_token(&toml::Value::Float(0.5)), "0.5");
    }

    #[test]
    fn rejects_malformed_files() {
        assert!(matches!(
            ModelFile::from_toml("[[production]]\nwhen = 3"),
            Err(CogzError::Config(_))
        ));
    }
}
