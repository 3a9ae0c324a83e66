//! Run-speed throttling.

use std::fmt;
use std::num::NonZeroU32;
use std::time::Duration;

/// Instruction rate the engine is allowed to run at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum RunSpeed {
    /// No sleeping between instructions.
    #[default]
    Unlimited,
    /// At most this many instructions per second.
    InstructionsPerSecond(NonZeroU32),
}

impl RunSpeed {
    /// Creates a throttled speed; zero means unlimited.
    #[must_use]
    pub const fn per_second(rate: u32) -> Self {
        match NonZeroU32::new(rate) {
            Some(rate) => Self::InstructionsPerSecond(rate),
            None => Self::Unlimited,
        }
    }

    /// Sleep between two iterations, or `None` when unthrottled.
    #[must_use]
    pub fn interval(self) -> Option<Duration> {
        match self {
            Self::Unlimited => None,
            Self::InstructionsPerSecond(rate) => {
                Some(Duration::from_secs(1) / rate.get())
            }
        }
    }

    /// Returns `true` when no throttle applies.
    #[must_use]
    pub const fn is_unlimited(self) -> bool {
        matches!(self, Self::Unlimited)
    }
}

impl fmt::Display for RunSpeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unlimited => f.write_str("unlimited"),
            Self::InstructionsPerSecond(rate) => write!(f, "{rate} inst/s"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::RunSpeed;

    #[test]
    fn zero_rate_is_unlimited() {
        assert_eq!(RunSpeed::per_second(0), RunSpeed::Unlimited);
        assert_eq!(RunSpeed::Unlimited.interval(), None);
        assert!(RunSpeed::default().is_unlimited());
    }

    #[test]
    fn interval_is_reciprocal_of_rate() {
        assert_eq!(
            RunSpeed::per_second(4).interval(),
            Some(Duration::from_millis(250))
        );
        assert_eq!(RunSpeed::per_second(30).to_string(), "30 inst/s");
    }
}
