//! Reconnection delay policy.
//!
//! A transport applies exactly one [`ReconnectPolicy`] for its whole
//! lifetime. Attempts are unbounded under both variants; only the spacing
//! differs.
//!
//! | Attempt | Exponential (default) | Fixed (2 s) |
//! |---------|-----------------------|-------------|
//! | 1 | 0.5 s – 1 s | 2 s |
//! | 2 | 1 s – 2 s | 2 s |
//! | 3 | 2 s – 4 s | 2 s |
//! | 6+ | 15 s – 30 s | 2 s |

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

use super::config::duration_ms;

// ============================================================================
// Constants
// ============================================================================

/// Default first exponential delay.
const DEFAULT_INITIAL: Duration = Duration::from_secs(1);

/// Default growth factor.
const DEFAULT_MULTIPLIER: f64 = 2.0;

/// Default delay cap.
const DEFAULT_MAX: Duration = Duration::from_secs(30);

/// Default jitter fraction.
const DEFAULT_JITTER: f64 = 0.5;

/// Exponent beyond which every realistic delay is already capped.
const MAX_EXPONENT: u32 = 63;

// ============================================================================
// ReconnectPolicy
// ============================================================================

/// Delay between reconnection attempts.
///
/// # Format
///
/// ```json
/// { "kind": "exponential", "initialMs": 1000, "multiplier": 2.0, "maxMs": 30000, "jitter": 0.5 }
/// { "kind": "fixed", "intervalMs": 2000 }
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ReconnectPolicy {
    /// Same delay before every attempt.
    Fixed {
        /// Delay between attempts.
        #[serde(rename = "intervalMs", with = "duration_ms")]
        interval: Duration,
    },

    /// Growing delay with an upper bound and randomized reduction.
    Exponential {
        /// Delay before the first attempt.
        #[serde(rename = "initialMs", with = "duration_ms")]
        initial: Duration,
        /// Growth factor per attempt.
        multiplier: f64,
        /// Upper bound on the un-jittered delay.
        #[serde(rename = "maxMs", with = "duration_ms")]
        max: Duration,
        /// Fraction in `[0, 1]` by which the delay may be reduced.
        jitter: f64,
    },
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::Exponential {
            initial: DEFAULT_INITIAL,
            multiplier: DEFAULT_MULTIPLIER,
            max: DEFAULT_MAX,
            jitter: DEFAULT_JITTER,
        }
    }
}

impl ReconnectPolicy {
    /// Creates a fixed-interval policy.
    #[inline]
    #[must_use]
    pub const fn fixed(interval: Duration) -> Self {
        Self::Fixed { interval }
    }

    /// Creates an exponential policy without jitter.
    #[inline]
    #[must_use]
    pub const fn exponential(initial: Duration, multiplier: f64, max: Duration) -> Self {
        Self::Exponential {
            initial,
            multiplier,
            max,
            jitter: 0.0,
        }
    }

    /// Returns the policy with the given jitter fraction.
    ///
    /// Has no effect on [`ReconnectPolicy::Fixed`].
    #[must_use]
    pub fn with_jitter(self, fraction: f64) -> Self {
        match self {
            Self::Exponential {
                initial,
                multiplier,
                max,
                ..
            } => Self::Exponential {
                initial,
                multiplier,
                max,
                jitter: fraction,
            },
            fixed @ Self::Fixed { .. } => fixed,
        }
    }

    /// Checks that the policy produces usable delays.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] describing the invalid field.
    pub fn validate(&self) -> Result<()> {
        match *self {
            Self::Fixed { interval } => {
                if interval.is_zero() {
                    return Err(Error::config("reconnect intervalMs must be greater than zero"));
                }
            }
            Self::Exponential {
                initial,
                multiplier,
                max,
                jitter,
            } => {
                if initial.is_zero() {
                    return Err(Error::config("reconnect initialMs must be greater than zero"));
                }
                if !multiplier.is_finite() || multiplier < 1.0 {
                    return Err(Error::config("reconnect multiplier must be finite and >= 1"));
                }
                if max < initial {
                    return Err(Error::config("reconnect maxMs must be >= initialMs"));
                }
                if !(0.0..=1.0).contains(&jitter) {
                    return Err(Error::config("reconnect jitter must be within [0, 1]"));
                }
            }
        }
        Ok(())
    }

    /// Returns the un-jittered delay for a 1-based attempt number.
    ///
    /// Attempt `0` is treated as attempt `1`.
    #[must_use]
    pub fn base_delay(&self, attempt: u32) -> Duration {
        match *self {
            Self::Fixed { interval } => interval,
            Self::Exponential {
                initial,
                multiplier,
                max,
                ..
            } => {
                let exponent = attempt.saturating_sub(1).min(MAX_EXPONENT);
                let factor = multiplier.powi(exponent as i32);
                let secs = (initial.as_secs_f64() * factor).min(max.as_secs_f64());
                Duration::try_from_secs_f64(secs).unwrap_or(max)
            }
        }
    }

    /// Returns the delay for `attempt` given a uniform sample in `[0, 1)`.
    ///
    /// The capped delay is reduced by `jitter * sample`.
    #[must_use]
    pub fn delay_with_sample(&self, attempt: u32, sample: f64) -> Duration {
        let base = self.base_delay(attempt);
        match *self {
            Self::Fixed { .. } => base,
            Self::Exponential { jitter, .. } => {
                let reduction = (jitter * sample.clamp(0.0, 1.0)).clamp(0.0, 1.0);
                base.mul_f64(1.0 - reduction)
            }
        }
    }

    /// Returns the randomized delay before `attempt`.
    #[must_use]
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let sample = match self {
            Self::Fixed { .. } => 0.0,
            Self::Exponential { jitter, .. } if *jitter == 0.0 => 0.0,
            Self::Exponential { .. } => rand::thread_rng().gen_range(0.0..1.0),
        };
        self.delay_with_sample(attempt, sample)
    }
}

// ============================================================================
// Tests
// ============================================================================
