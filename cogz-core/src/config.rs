//! Configuration for the COGZ engine.
//!
//! Maps directly to `cogz.toml`. Every field can also be set through the
//! ACT-R style global parameter table (`:rt`, `:ans`, `:bll`, ...) with
//! [`CogzConfig::apply_parameter`]; each key maps to exactly one field of
//! exactly one section.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{CogzError, Result};

/// Top-level configuration, loadable from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CogzConfig {
    /// Run-wide settings.
    #[serde(default)]
    pub general: GeneralConfig,
    /// Activation and retrieval.
    #[serde(default)]
    pub declarative: DeclarativeConfig,
    /// Conflict resolution and utility learning.
    #[serde(default)]
    pub procedural: ProceduralConfig,
    /// Production compilation.
    #[serde(default)]
    pub compilation: CompilationConfig,
    /// Buffer timing and decay.
    #[serde(default)]
    pub buffers: BuffersConfig,
    /// Fatigue modulation of utilities.
    #[serde(default)]
    pub fatigue: FatigueConfig,
}

impl CogzConfig {
    /// Load configuration from a TOML string.
    ///
    /// # Errors
    /// Returns `CogzError::Config` if the TOML is invalid.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str).map_err(|e| CogzError::Config(e.to_string()))
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Apply one entry of the global parameter table.
    ///
    /// # Errors
    /// Returns `CogzError::Parameter` for an unknown key or a value of the
    /// wrong kind.
    pub fn apply_parameter(&mut self, key: &str, value: &ParamValue) -> Result<()> {
        let d = &mut self.declarative;
        let p = &mut self.procedural;
        match key {
            ":seed" => self.general.seed = Some(value.as_count(key)? as u64),
            ":v" | ":trace" => self.general.trace = value.as_bool(key)?,
            ":act" => self.general.activation_trace = value.as_bool(key)?,
            ":real-time" => self.general.realtime_scale = value.as_number(key)?,
            ":threaded" => self.general.threaded_cognition = value.as_bool(key)?,

            ":bll" => d.base_level_decay = value.as_optional_number(key)?,
            ":ol" => d.optimized_learning = value.as_bool(key)?,
            ":blc" => d.base_level_constant = value.as_number(key)?,
            ":ans" => d.activation_noise = value.as_optional_number(key)?,
            ":rt" => d.retrieval_threshold = value.as_number(key)?,
            ":lf" => d.latency_factor = value.as_number(key)?,
            ":mas" => d.max_associative_strength = value.as_optional_number(key)?,
            ":ga" => d.goal_activation = value.as_number(key)?,
            ":imaginal-activation" => d.imaginal_activation = value.as_number(key)?,
            ":mp" => d.mismatch_penalty = value.as_optional_number(key)?,
            ":ms" => d.max_similarity = value.as_number(key)?,
            ":md" => d.max_difference = value.as_number(key)?,
            ":num-finsts" => d.num_finsts = value.as_count(key)?,
            ":finst-span" => d.finst_span = value.as_number(key)?,
            ":merge" => d.merge_chunks = value.as_bool(key)?,

            ":dat" => p.action_time = value.as_number(key)?,
            ":randomize-time" => p.randomize_time = value.as_bool(key)?,
            ":egs" => p.utility_noise = value.as_optional_number(key)?,
            ":ul" => p.utility_learning = value.as_bool(key)?,
            ":alpha" => p.learning_rate = value.as_number(key)?,
            ":ut" => p.utility_threshold = value.as_optional_number(key)?,
            ":iu" => p.initial_utility = value.as_number(key)?,
            ":reward-window" => p.reward_window = value.as_count(key)?,
            ":fuzzy" => p.fuzzy_matching = value.as_bool(key)?,

            ":epl" => self.compilation.enabled = value.as_bool(key)?,
            ":tt" => self.compilation.window = value.as_number(key)?,
            ":nu" => self.compilation.new_utility = value.as_number(key)?,

            ":imaginal-delay" => self.buffers.imaginal_delay = value.as_number(key)?,
            ":buffer-decay" => self.buffers.decay_lifetime = value.as_optional_number(key)?,

            ":fatigue" => self.fatigue.enabled = value.as_bool(key)?,
            ":fp" => self.fatigue.utility_scale = value.as_number(key)?,
            ":fp-dec" => self.fatigue.lapse_decrement = value.as_number(key)?,
            ":fd" => self.fatigue.threshold_shift = value.as_number(key)?,

            _ => {
                return Err(CogzError::Parameter {
                    key: key.to_owned(),
                    reason: "unrecognized key".to_owned(),
                });
            }
        }
        Ok(())
    }
}

/// A parameter value as it appears in a model's parameter table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParamValue {
    /// `t` / `nil` style booleans.
    Bool(bool),
    /// Numeric value.
    Number(f64),
    /// Anything else.
    Text(String),
}

impl ParamValue {
    /// Read a raw token: `t` → true, `nil` → false, numbers → `Number`.
    #[must_use]
    pub fn parse(token: &str) -> Self {
        match token {
            "t" | "true" => Self::Bool(true),
            "nil" | "false" => Self::Bool(false),
            _ => token
                .parse::<f64>()
                .map_or_else(|_| Self::Text(token.to_owned()), Self::Number),
        }
    }

    pub(crate) fn as_bool(&self, key: &str) -> Result<bool> {
        match self {
            Self::Bool(b) => Ok(*b),
            Self::Number(n) => Ok(*n != 0.0),
            Self::Text(_) => Err(wrong_kind(key, "boolean")),
        }
    }

    pub(crate) fn as_number(&self, key: &str) -> Result<f64> {
        match self {
            Self::Number(n) => Ok(*n),
            _ => Err(wrong_kind(key, "number")),
        }
    }

    /// `nil` disables an optional numeric parameter.
    pub(crate) fn as_optional_number(&self, key: &str) -> Result<Option<f64>> {
        match self {
            Self::Number(n) => Ok(Some(*n)),
            Self::Bool(false) => Ok(None),
            _ => Err(wrong_kind(key, "number or nil")),
        }
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn as_count(&self, key: &str) -> Result<usize> {
        match self {
            Self::Number(n) if *n >= 0.0 && n.fract() == 0.0 => Ok(*n as usize),
            _ => Err(wrong_kind(key, "non-negative integer")),
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(true) => f.write_str("t"),
            Self::Bool(false) => f.write_str("nil"),
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

fn wrong_kind(key: &str, expected: &str) -> CogzError {
    CogzError::Parameter {
        key: key.to_owned(),
        reason: format!("expected {expected}"),
    }
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// Run-wide settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// RNG seed; `None` seeds from entropy.
    #[serde(default)]
    pub seed: Option<u64>,
    /// Write the event trace.
    #[serde(default = "default_true")]
    pub trace: bool,
    /// Write per-candidate activation lines during retrieval.
    #[serde(default)]
    pub activation_trace: bool,
    /// Wall-clock seconds per simulated second when pacing in real time.
    #[serde(default = "default_1_0")]
    pub realtime_scale: f64,
    /// `+goal` requests add a new goal thread instead of replacing the goal.
    #[serde(default)]
    pub threaded_cognition: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            seed: None,
            trace: true,
            activation_trace: false,
            realtime_scale: 1.0,
            threaded_cognition: false,
        }
    }
}

/// Activation and retrieval parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeclarativeConfig {
    /// Base-level decay `d`; `None` disables base-level learning.
    #[serde(default)]
    pub base_level_decay: Option<f64>,
    /// Use the closed-form approximation instead of the full use history.
    #[serde(default = "default_true")]
    pub optimized_learning: bool,
    /// Constant added to every base level.
    #[serde(default)]
    pub base_level_constant: f64,
    /// Activation noise `s`; `None` disables noise.
    #[serde(default)]
    pub activation_noise: Option<f64>,
    /// Retrieval threshold `τ`.
    #[serde(default)]
    pub retrieval_threshold: f64,
    /// Latency factor `F`.
    #[serde(default = "default_1_0")]
    pub latency_factor: f64,
    /// Maximum associative strength `S`; `None` disables spreading.
    #[serde(default)]
    pub max_associative_strength: Option<f64>,
    /// Total source activation `W` of the goal buffer.
    #[serde(default = "default_1_0")]
    pub goal_activation: f64,
    /// Total source activation of the imaginal buffer.
    #[serde(default)]
    pub imaginal_activation: f64,
    /// Mismatch penalty `P`; `None` disables partial matching.
    #[serde(default)]
    pub mismatch_penalty: Option<f64>,
    /// Similarity of identical values.
    #[serde(default)]
    pub max_similarity: f64,
    /// Default similarity of different values.
    #[serde(default = "default_neg_1_0")]
    pub max_difference: f64,
    /// How many recently retrieved chunks are marked.
    #[serde(default = "default_4")]
    pub num_finsts: usize,
    /// Seconds a retrieval mark lasts.
    #[serde(default = "default_3_0")]
    pub finst_span: f64,
    /// Merge structurally-equal chunks on add.
    #[serde(default = "default_true")]
    pub merge_chunks: bool,
}

impl Default for DeclarativeConfig {
    fn default() -> Self {
        Self {
            base_level_decay: None,
            optimized_learning: true,
            base_level_constant: 0.0,
            activation_noise: None,
            retrieval_threshold: 0.0,
            latency_factor: 1.0,
            max_associative_strength: None,
            goal_activation: 1.0,
            imaginal_activation: 0.0,
            mismatch_penalty: None,
            max_similarity: 0.0,
            max_difference: -1.0,
            num_finsts: 4,
            finst_span: 3.0,
            merge_chunks: true,
        }
    }
}

/// Conflict resolution and utility learning parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProceduralConfig {
    /// Seconds between selection and firing.
    #[serde(default = "default_0_05")]
    pub action_time: f64,
    /// Draw the action time uniformly from [2/3, 4/3] of its value.
    #[serde(default)]
    pub randomize_time: bool,
    /// Utility noise `s`; `None` disables noise.
    #[serde(default)]
    pub utility_noise: Option<f64>,
    /// Learn utilities from rewards.
    #[serde(default)]
    pub utility_learning: bool,
    /// Learning rate α.
    #[serde(default = "default_0_2")]
    pub learning_rate: f64,
    /// Utility threshold; `None` means any match can fire.
    #[serde(default)]
    pub utility_threshold: Option<f64>,
    /// Utility given to productions that do not set one.
    #[serde(default)]
    pub initial_utility: f64,
    /// Maximum number of firings awaiting a reward.
    #[serde(default = "default_100")]
    pub reward_window: usize,
    /// Tolerate failed conditions, scoring such matches with noise only.
    #[serde(default)]
    pub fuzzy_matching: bool,
    /// Buffers exempt from the implicit clear of harvested buffers.
    #[serde(default)]
    pub harvest_exempt: Vec<String>,
}

impl Default for ProceduralConfig {
    fn default() -> Self {
        Self {
            action_time: 0.05,
            randomize_time: false,
            utility_noise: None,
            utility_learning: false,
            learning_rate: 0.2,
            utility_threshold: None,
            initial_utility: 0.0,
            reward_window: 100,
            fuzzy_matching: false,
            harvest_exempt: Vec::new(),
        }
    }
}

/// Production compilation parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompilationConfig {
    /// Whether compilation runs at all.
    #[serde(default)]
    pub enabled: bool,
    /// Maximum seconds between the two source firings.
    #[serde(default = "default_1_0")]
    pub window: f64,
    /// Utility of a newly compiled production.
    #[serde(default)]
    pub new_utility: f64,
}

impl Default for CompilationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            window: 1.0,
            new_utility: 0.0,
        }
    }
}

/// Buffer timing and decay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuffersConfig {
    /// Seconds before an imaginal request is served.
    #[serde(default = "default_0_2")]
    pub imaginal_delay: f64,
    /// Clear untouched decaying buffers after this many seconds.
    #[serde(default)]
    pub decay_lifetime: Option<f64>,
    /// Buffers subject to decay.
    #[serde(default = "default_decaying")]
    pub decaying: Vec<String>,
}

impl Default for BuffersConfig {
    fn default() -> Self {
        Self {
            imaginal_delay: 0.2,
            decay_lifetime: None,
            decaying: default_decaying(),
        }
    }
}

/// Fatigue modulation: utilities are scaled by a factor that drops with
/// every micro-lapse; the threshold is shifted by a constant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FatigueConfig {
    /// Whether fatigue modulation is active.
    #[serde(default)]
    pub enabled: bool,
    /// Starting utility scale factor.
    #[serde(default = "default_1_0")]
    pub utility_scale: f64,
    /// Drop in the scale factor after each micro-lapse.
    #[serde(default = "default_0_01")]
    pub lapse_decrement: f64,
    /// Amount subtracted from the utility threshold.
    #[serde(default)]
    pub threshold_shift: f64,
}

impl Default for FatigueConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            utility_scale: 1.0,
            lapse_decrement: 0.01,
            threshold_shift: 0.0,
        }
    }
}

// ---------------------------------------------------------------------------
// Serde default helpers
// ---------------------------------------------------------------------------

fn default_true() -> bool { true }
fn default_0_01() -> f64 { 0.01 }
fn default_0_05() -> f64 { 0.05 }
fn default_0_2() -> f64 { 0.2 }
fn default_1_0() -> f64 { 1.0 }
fn default_3_0() -> f64 { 3.0 }
fn default_neg_1_0() -> f64 { -1.0 }
fn default_4() -> usize { 4 }
fn default_100() -> usize { 100 }
fn default_decaying() -> Vec<String> { vec!["retrieval".to_string()] }

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_yields_defaults() {
        let config = CogzConfig::from_toml("").expect("parse");
        assert!((config.procedural.action_time - 0.05).abs() < f64::EPSILON);
        assert!(config.declarative.optimized_learning);
        assert_eq!(config.buffers.decaying, vec!["retrieval".to_string()]);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = CogzConfig::from_toml(
            "[declarative]\nbase_level_decay = 0.5\nretrieval_threshold = -1.5\n",
        )
        .expect("parse");
        assert_eq!(config.declarative.base_level_decay, Some(0.5));
        assert!((config.declarative.retrieval_threshold + 1.5).abs() < f64::EPSILON);
        assert!((config.declarative.latency_factor - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn loads_from_file() {
        use std::io::Write;

        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "[general]\nseed = 11\n\n[compilation]\nenabled = true").expect("write");
        let config = CogzConfig::from_file(file.path()).expect("load");
        assert_eq!(config.general.seed, Some(11));
        assert!(config.compilation.enabled);

        let missing = CogzConfig::from_file(std::path::Path::new("/nonexistent/cogz.toml"));
        assert!(matches!(missing, Err(CogzError::Io(_))));
    }

    #[test]
    fn parameter_table_maps_each_key_to_one_field() {
        let mut config = CogzConfig::default();
        config.apply_parameter(":rt", &ParamValue::parse("-2")).expect(":rt");
        config.apply_parameter(":ans", &ParamValue::parse("0.25")).expect(":ans");
        config.apply_parameter(":epl", &ParamValue::parse("t")).expect(":epl");
        config.apply_parameter(":mas", &ParamValue::parse("nil")).expect(":mas");
        assert!((config.declarative.retrieval_threshold + 2.0).abs() < f64::EPSILON);
        assert_eq!(config.declarative.activation_noise, Some(0.25));
        assert!(config.compilation.enabled);
        assert_eq!(config.declarative.max_associative_strength, None);
    }

    #[test]
    fn unknown_keys_and_wrong_kinds_are_rejected() {
        let mut config = CogzConfig::default();
        assert!(matches!(
            config.apply_parameter(":bogus", &ParamValue::Bool(true)),
            Err(CogzError::Parameter { .. })
        ));
        assert!(config.apply_parameter(":rt", &ParamValue::parse("high")).is_err());
    }
}
