//! Reconnect delay schedule.

use std::time::Duration;

/// Ordered reconnect delays. Attempt `n` waits the `n`th entry; once the
/// table runs out the last entry repeats forever.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffSchedule {
    delays: Vec<Duration>,
}

impl Default for BackoffSchedule {
    fn default() -> Self {
        Self::from_secs(&[0, 2, 10, 30, 60])
    }
}

impl BackoffSchedule {
    pub fn new(delays: Vec<Duration>) -> Self {
        Self { delays }
    }

    pub fn from_secs(secs: &[u64]) -> Self {
        Self::new(secs.iter().copied().map(Duration::from_secs).collect())
    }

    /// Parse a comma-separated list of seconds, e.g. `"0,2,10,30,60"`.
    pub fn parse(list: &str) -> Result<Self, std::num::ParseIntError> {
        let secs = list
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::parse::<u64>)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::from_secs(&secs))
    }

    /// Delay before reconnect attempt `attempt` (zero-based).
    pub fn delay_for(&self, attempt: usize) -> Duration {
        match self.delays.last() {
            Some(last) => self.delays.get(attempt).copied().unwrap_or(*last),
            None => Duration::ZERO,
        }
    }

    pub fn delays(&self) -> &[Duration] {
        &self.delays
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_clamp_to_the_last_entry() {
        let schedule = BackoffSchedule::from_secs(&[0, 2, 10]);
        let observed: Vec<u64> = (0..5).map(|n| schedule.delay_for(n).as_secs()).collect();
        assert_eq!(observed, vec![0, 2, 10, 10, 10]);
    }

    #[test]
    fn empty_schedule_retries_immediately() {
        let schedule = BackoffSchedule::new(Vec::new());
        assert_eq!(schedule.delay_for(0), Duration::ZERO);
        assert_eq!(schedule.delay_for(42), Duration::ZERO);
    }

    #[test]
    fn parses_comma_separated_seconds() {
        let schedule = BackoffSchedule::parse(" 0, 2,10 ,").expect("parse");
        assert_eq!(schedule, BackoffSchedule::from_secs(&[0, 2, 10]));
        assert!(BackoffSchedule::parse("1,two").is_err());
    }

    #[test]
    fn default_schedule_ends_at_one_minute() {
        let schedule = BackoffSchedule::default();
        assert_eq!(schedule.delay_for(0), Duration::ZERO);
        assert_eq!(schedule.delay_for(100), Duration::from_secs(60));
    }
}
