use chrono::{DateTime, Days, Utc};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tracing::{info, warn};

/// When a tripped breaker closes again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerReset {
    After(Duration),
    NextUtcMidnight,
}

/// Remembers a provider failure so later calls skip straight to their
/// fallback instead of waiting on a provider known to be down.
///
/// Shared by handle (`Arc<CircuitBreaker>`) between the search engine and the
/// completion call site.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    reset: BreakerReset,
    open_until: Mutex<Option<DateTime<Utc>>>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, reset: BreakerReset) -> Self {
        Self {
            name: name.into(),
            reset,
            open_until: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_open(&self) -> bool {
        self.is_open_at(Utc::now())
    }

    pub fn is_open_at(&self, now: DateTime<Utc>) -> bool {
        let mut guard = self.open_until.lock().unwrap_or_else(PoisonError::into_inner);
        match *guard {
            Some(until) if now < until => true,
            Some(_) => {
                *guard = None;
                info!(breaker = %self.name, "circuit closed after reset window");
                false
            }
            None => false,
        }
    }

    pub fn open_until(&self) -> Option<DateTime<Utc>> {
        *self.open_until.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn trip(&self, reason: &str) -> DateTime<Utc> {
        self.trip_at(Utc::now(), reason)
    }

    pub fn trip_at(&self, now: DateTime<Utc>, reason: &str) -> DateTime<Utc> {
        let until = self.reopen_time(now);
        let mut guard = self.open_until.lock().unwrap_or_else(PoisonError::into_inner);
        *guard = Some(until);
        warn!(breaker = %self.name, %until, reason, "circuit opened");
        until
    }

    pub fn reset(&self) {
        *self.open_until.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    fn reopen_time(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self.reset {
            BreakerReset::After(cooldown) => chrono::Duration::from_std(cooldown)
                .ok()
                .and_then(|delta| now.checked_add_signed(delta))
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
            BreakerReset::NextUtcMidnight => now
                .date_naive()
                .checked_add_days(Days::new(1))
                .and_then(|day| day.and_hms_opt(0, 0, 0))
                .map(|midnight| midnight.and_utc())
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new("provider", BreakerReset::NextUtcMidnight)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn stays_open_for_the_rest_of_the_day() {
        let breaker = CircuitBreaker::default();
        let afternoon = Utc.with_ymd_and_hms(2026, 3, 9, 15, 30, 0).unwrap();
        let until = breaker.trip_at(afternoon, "quota exhausted");

        assert_eq!(until, Utc.with_ymd_and_hms(2026, 3, 10, 0, 0, 0).unwrap());
        assert!(breaker.is_open_at(afternoon));
        assert!(breaker.is_open_at(Utc.with_ymd_and_hms(2026, 3, 9, 23, 59, 59).unwrap()));
        assert!(!breaker.is_open_at(until));
        assert_eq!(breaker.open_until(), None);
    }

    #[test]
    fn cooldown_reset_and_manual_reset() {
        let breaker =
            CircuitBreaker::new("embeddings", BreakerReset::After(Duration::from_secs(60)));
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 8, 0, 0).unwrap();
        breaker.trip_at(now, "timeout");

        assert!(breaker.is_open_at(now + chrono::Duration::seconds(59)));
        breaker.reset();
        assert!(!breaker.is_open_at(now));
    }
}
