//! Segment planning: split a target duration into provider-sized segments.
//!
//! The planner fills the target with maximum-length segments and then deals
//! with whatever is left over. Variable-length providers get an exact fit
//! where possible; fixed-length providers always receive full segments and the
//! overshoot is trimmed later by the concatenation step.

/// Tolerance used when comparing second values.
pub const DURATION_EPSILON: f64 = 1e-6;

/// Largest chain the planner will produce.
pub const MAX_SEGMENTS: usize = 1000;

/// Errors produced while planning a chain.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PlanningError {
    #[error("Target duration must be greater than zero, got {0}")]
    InvalidDuration(f64),

    #[error("Invalid segment bounds: min {min}s, max {max}s")]
    InvalidBounds { min: f64, max: f64 },

    #[error("Target duration {target}s needs more than {limit} segments")]
    TooManySegments { target: f64, limit: usize },
}

/// Per-call duration capability of a video provider.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegmentBounds {
    /// Shortest segment the provider can produce, in seconds.
    pub min_secs: f64,
    /// Longest segment the provider can produce, in seconds.
    pub max_secs: f64,
    /// Whether the provider accepts any length inside `[min, max]`.
    pub variable: bool,
}

impl SegmentBounds {
    /// Bounds for a provider that accepts any length in `[min, max]`.
    pub fn variable(min_secs: f64, max_secs: f64) -> Self {
        Self {
            min_secs,
            max_secs,
            variable: true,
        }
    }

    /// Bounds for a provider that always emits clips of one length.
    pub fn fixed(clip_secs: f64) -> Self {
        Self {
            min_secs: clip_secs,
            max_secs: clip_secs,
            variable: false,
        }
    }

    /// Validate that the bounds describe a usable provider.
    pub fn validate(&self) -> Result<(), PlanningError> {
        let finite = self.min_secs.is_finite() && self.max_secs.is_finite();
        if !finite || self.min_secs <= 0.0 || self.min_secs > self.max_secs {
            return Err(PlanningError::InvalidBounds {
                min: self.min_secs,
                max: self.max_secs,
            });
        }
        Ok(())
    }

    /// Check whether a length is one the provider could be asked for.
    pub fn contains(&self, secs: f64) -> bool {
        secs >= self.min_secs - DURATION_EPSILON && secs <= self.max_secs + DURATION_EPSILON
    }
}

/// Plan segment lengths covering `target_secs`.
///
/// Every returned length lies within `bounds` and the lengths sum to at least
/// `target_secs`. A target shorter than the provider minimum yields a single
/// minimum-length segment.
pub fn plan_segments(target_secs: f64, bounds: &SegmentBounds) -> Result<Vec<f64>, PlanningError> {
    if !target_secs.is_finite() || target_secs <= 0.0 {
        return Err(PlanningError::InvalidDuration(target_secs));
    }
    bounds.validate()?;
    if (target_secs / bounds.max_secs - DURATION_EPSILON).ceil() > MAX_SEGMENTS as f64 {
        return Err(PlanningError::TooManySegments {
            target: target_secs,
            limit: MAX_SEGMENTS,
        });
    }

    if target_secs <= bounds.min_secs + DURATION_EPSILON {
        return Ok(vec![bounds.min_secs]);
    }

    let full = (target_secs / bounds.max_secs + DURATION_EPSILON).floor() as usize;
    let mut lengths = vec![bounds.max_secs; full];
    let remainder = target_secs - full as f64 * bounds.max_secs;

    if remainder <= DURATION_EPSILON {
        return Ok(lengths);
    }

    if !bounds.variable {
        lengths.push(bounds.max_secs);
        return Ok(lengths);
    }

    if remainder >= bounds.min_secs - DURATION_EPSILON {
        lengths.push(remainder.max(bounds.min_secs));
        return Ok(lengths);
    }

    // Remainder is below the minimum. Fold it into the previous segment and
    // split that back into two legal lengths when the sum allows it.
    match lengths.last_mut() {
        Some(last) if *last + remainder <= bounds.max_secs + DURATION_EPSILON => {
            *last += remainder;
        }
        Some(last) if *last + remainder >= 2.0 * bounds.min_secs - DURATION_EPSILON => {
            *last = *last + remainder - bounds.min_secs;
            lengths.push(bounds.min_secs);
        }
        _ => lengths.push(bounds.min_secs),
    }

    Ok(lengths)
}

/// Planning rounds allowed for the join overlap to settle.
const OVERLAP_PLAN_ROUNDS: usize = 8;

/// Plan segments whose joined length still covers `target_secs` when every
/// join loses `overlap_secs` to a cross-fade.
pub fn plan_with_overlap(
    target_secs: f64,
    bounds: &SegmentBounds,
    overlap_secs: f64,
) -> Result<Vec<f64>, PlanningError> {
    let mut lengths = plan_segments(target_secs, bounds)?;
    if overlap_secs <= 0.0 {
        return Ok(lengths);
    }
    for _ in 0..OVERLAP_PLAN_ROUNDS {
        let joins = lengths.len().saturating_sub(1) as f64;
        let padded = plan_segments(target_secs + joins * overlap_secs, bounds)?;
        let settled = padded.len() == lengths.len();
        lengths = padded;
        if settled {
            break;
        }
    }
    Ok(lengths)
}

/// Sum of planned or realized segment lengths.
pub fn total_secs(lengths: &[f64]) -> f64 {
    lengths.iter().sum()
}
