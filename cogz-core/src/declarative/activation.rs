//! Per-term activation functions for declarative retrieval.
//!
//! A_i = B_i + Σ_j W_j·S_ji + P·Σ_k M_ki + ε
//!
//! Where:
//!   B_i   = base level (recency / frequency of use)
//!   W_j   = source weight of filler j in the goal or imaginal buffer
//!   S_ji  = S − ln(fan_j), only when j is connected to i
//!   M_ki  = similarity between requested and stored value of slot k
//!   ε     = logistic noise, s·ln((1−p)/p)
//!
//! Reference: Anderson, J. R. & Lebiere, C. (1998). "The Atomic Components
//! of Thought."

use rand::Rng;

use crate::chunk::Chunk;
use crate::config::DeclarativeConfig;
use crate::event::Time;
use crate::symbol::{Symbol, sym};

/// Smallest age used in the decay terms; a presentation at `now` would
/// otherwise contribute an infinite base level.
pub const MIN_AGE: Time = 0.05;

/// Breakdown of an activation value into its terms.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ActivationBreakdown {
    /// Base-level term.
    pub base_level: f64,
    /// Spreading activation from goal / imaginal sources.
    pub spreading: f64,
    /// Partial-matching penalty (zero or negative).
    pub partial_match: f64,
    /// Noise sample.
    pub noise: f64,
}

impl ActivationBreakdown {
    /// Sum of all terms.
    #[must_use]
    pub fn total(&self) -> f64 {
        self.base_level + self.spreading + self.partial_match + self.noise
    }
}

/// One spreading-activation source: a non-nil filler of the goal or
/// imaginal buffer with its share of that buffer's weight.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpreadingSource {
    /// The filler value.
    pub value: Symbol,
    /// `W / n` for the buffer the filler came from.
    pub weight: f64,
    /// Fan of the filler (1 when it is not a stored chunk).
    pub fan: u32,
}

/// Base level of a chunk at `now`.
///
/// - learning disabled: the chunk's stored constant;
/// - optimized: `ln(n/(1−d)) − d·ln(now − creation)`;
/// - exact: `ln Σ (now − tᵢ)^(−d)` over every recorded presentation.
///
/// The configured constant is added in every case.
#[must_use]
pub fn base_level(chunk: &Chunk, now: Time, config: &DeclarativeConfig) -> f64 {
    let learned = match config.base_level_decay {
        None => chunk.base_level,
        Some(decay) if config.optimized_learning => {
            optimized_base_level(chunk.use_count, decay, now - chunk.creation_time)
        }
        Some(decay) => exact_base_level(&chunk.use_times, decay, now),
    };
    learned + config.base_level_constant
}

/// Closed-form approximation `ln(n/(1−d)) − d·ln(age)`.
#[must_use]
pub fn optimized_base_level(uses: u32, decay: f64, age: Time) -> f64 {
    let n = f64::from(uses.max(1));
    (n / (1.0 - decay)).ln() - decay * age.max(MIN_AGE).ln()
}

/// Log-sum over presentation times `ln Σ (now − tᵢ)^(−d)`.
///
/// Presentations in the future are ignored; no presentations at all give
/// negative infinity.
#[must_use]
pub fn exact_base_level(use_times: &[Time], decay: f64, now: Time) -> f64 {
    use_times
        .iter()
        .filter(|&&t| t <= now)
        .map(|&t| (now - t).max(MIN_AGE).powf(-decay))
        .sum::<f64>()
        .ln()
}

/// Spreading activation received by `chunk` from `sources`.
///
/// A source contributes only when it is connected to the chunk: it appears
/// as one of the chunk's slot values, or it is the chunk itself.
#[must_use]
pub fn spreading(chunk: &Chunk, sources: &[SpreadingSource], max_strength: f64) -> f64 {
    sources
        .iter()
        .filter(|source| source.value == chunk.name || chunk.references(source.value))
        .map(|source| source.weight * (max_strength - f64::from(source.fan.max(1)).ln()))
        .sum()
}

/// Partial-matching term `P · Σ sim(requested, stored)` over the request's
/// equality slots (`isa` and `:recently-retrieved` excluded).
pub fn partial_match<F>(request: &Chunk, chunk: &Chunk, penalty: f64, mut similarity: F) -> f64
where
    F: FnMut(Symbol, Symbol) -> f64,
{
    request
        .slots
        .iter()
        .filter(|&(&slot, _)| slot != sym::ISA && slot != sym::RECENTLY_RETRIEVED)
        .map(|(&slot, &wanted)| similarity(wanted, chunk.get(slot)))
        .sum::<f64>()
        * penalty
}

/// One logistic noise sample `s·ln((1−p)/p)`, `p` uniform and clamped away
/// from 0 and 1.
pub fn logistic_noise<R: Rng + ?Sized>(s: f64, rng: &mut R) -> f64 {
    let p: f64 = rng.r#gen::<f64>().clamp(1e-10, 1.0 - 1e-10);
    s * ((1.0 - p) / p).ln()
}

/// Seconds to complete a successful retrieval: `F·e^(−A)`.
#[must_use]
pub fn retrieval_latency(activation: f64, config: &DeclarativeConfig) -> Time {
    config.latency_factor * (-activation).exp()
}

/// Seconds to report a failed retrieval: `F·e^(−τ)`.
#[must_use]
pub fn failure_latency(config: &DeclarativeConfig) -> Time {
    config.latency_factor * (-config.retrieval_threshold).exp()
}
