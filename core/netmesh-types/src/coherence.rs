//! Coherence specifications.
//!
//! A coherence specification says how fresh a replica sourced from an
//! external resource must be kept, i.e. how often its Probe re-runs.

use crate::Error;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

const ONE_TIME_ONLY_TAG: &str = "one-time-only";
const PERIODIC_TAG: &str = "periodic";
const ADAPTIVE_PERIODIC_TAG: &str = "adaptive-periodic";

/// Default fallback delay of the default adaptive specification (1 hour).
pub const DEFAULT_ADAPTIVE_FALLBACK_MS: u64 = 60 * 60 * 1000;
/// Default maximum delay of the default adaptive specification (1 week).
pub const DEFAULT_ADAPTIVE_MAX_MS: u64 = 7 * 24 * 60 * 60 * 1000;
/// Default growth factor of the default adaptive specification.
pub const DEFAULT_ADAPTIVE_FACTOR: f64 = 1.1;

/// How often a Probe-sourced replica is refreshed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum CoherenceSpecification {
    /// Run the Probe once, never again.
    OneTimeOnly,
    /// Re-run every `period_ms`.
    Periodic { period_ms: u64 },
    /// Start at `fallback_ms`; grow by `factor` after every run that changed
    /// nothing, up to `max_ms`; fall back after a run that changed something.
    AdaptivePeriodic {
        fallback_ms: u64,
        max_ms: u64,
        factor: f64,
    },
}

impl CoherenceSpecification {
    /// Parses the external form produced by [`to_external_form`](Self::to_external_form).
    pub fn from_external_form(ext: &str) -> Result<Self, Error> {
        let invalid = || Error::InvalidCoherenceSpecification(ext.to_string());

        if ext == ONE_TIME_ONLY_TAG {
            return Ok(Self::OneTimeOnly);
        }
        let (tag, args) = ext.split_once('{').ok_or_else(invalid)?;
        let args = args.strip_suffix('}').ok_or_else(invalid)?;
        let parts: Vec<&str> = args.split(',').map(str::trim).collect();

        match (tag, parts.as_slice()) {
            (PERIODIC_TAG, [period]) => Ok(Self::Periodic {
                period_ms: period.parse().map_err(|_| invalid())?,
            }),
            (ADAPTIVE_PERIODIC_TAG, [fallback, max, factor]) => {
                let factor: f64 = factor.parse().map_err(|_| invalid())?;
                if !factor.is_finite() || factor < 1.0 {
                    return Err(invalid());
                }
                Ok(Self::AdaptivePeriodic {
                    fallback_ms: fallback.parse().map_err(|_| invalid())?,
                    max_ms: max.parse().map_err(|_| invalid())?,
                    factor,
                })
            }
            _ => Err(invalid()),
        }
    }

    /// Returns the external form, e.g. `periodic{60000}`.
    #[must_use]
    pub fn to_external_form(&self) -> String {
        match self {
            Self::OneTimeOnly => ONE_TIME_ONLY_TAG.to_string(),
            Self::Periodic { period_ms } => format!("{PERIODIC_TAG}{{{period_ms}}}"),
            Self::AdaptivePeriodic {
                fallback_ms,
                max_ms,
                factor,
            } => format!("{ADAPTIVE_PERIODIC_TAG}{{{fallback_ms},{max_ms},{factor:?}}}"),
        }
    }

    /// Delay before the first scheduled re-run, `None` if never.
    #[must_use]
    pub fn initial_delay(&self) -> Option<Duration> {
        match self {
            Self::OneTimeOnly => None,
            Self::Periodic { period_ms } => Some(Duration::from_millis(*period_ms)),
            Self::AdaptivePeriodic { fallback_ms, .. } => Some(Duration::from_millis(*fallback_ms)),
        }
    }

    /// Delay until the next run, given the previous delay and whether the
    /// run that just finished changed anything. `None` means never again.
    #[must_use]
    pub fn next_delay(&self, previous: Option<Duration>, changed: bool) -> Option<Duration> {
        match self {
            Self::OneTimeOnly => None,
            Self::Periodic { period_ms } => Some(Duration::from_millis(*period_ms)),
            Self::AdaptivePeriodic {
                fallback_ms,
                max_ms,
                factor,
            } => {
                let fallback = Duration::from_millis(*fallback_ms);
                let next = match previous {
                    Some(prev) if !changed => prev.mul_f64(*factor),
                    _ => fallback,
                };
                Some(next.min(Duration::from_millis(*max_ms)))
            }
        }
    }
}

impl Default for CoherenceSpecification {
    fn default() -> Self {
        Self::AdaptivePeriodic {
            fallback_ms: DEFAULT_ADAPTIVE_FALLBACK_MS,
            max_ms: DEFAULT_ADAPTIVE_MAX_MS,
            factor: DEFAULT_ADAPTIVE_FACTOR,
        }
    }
}

impl fmt::Display for CoherenceSpecification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_external_form())
    }
}

impl FromStr for CoherenceSpecification {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_external_form(s)
    }
}

impl TryFrom<String> for CoherenceSpecification {
    type Error = Error;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::from_external_form(&s)
    }
}

impl From<CoherenceSpecification> for String {
    fn from(spec: CoherenceSpecification) -> Self {
        spec.to_external_form()
    }
}
