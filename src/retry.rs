use std::thread;
use std::time::{Duration, Instant};

/// Exponential backoff: attempt `n` (0-based) waits `initial * factor^n`,
/// capped at `max`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    pub initial: Duration,
    pub max: Duration,
    pub factor: f64,
}

impl Backoff {
    pub fn delay(&self, attempt: u32) -> Duration {
        let ms = self.initial.as_millis() as f64 * self.factor.powi(attempt as i32);
        let max_ms = self.max.as_millis() as f64;
        if !ms.is_finite() || ms >= max_ms {
            self.max
        } else {
            Duration::from_millis(ms.round() as u64)
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Polled<T> {
    pub value: T,
    pub attempts: u32,
    pub elapsed: Duration,
}

#[derive(Debug)]
pub enum PollError<E> {
    Timeout { attempts: u32, elapsed: Duration },
    Failed(E),
}

/// Call `probe` until it yields `Some`, sleeping per `backoff` in between.
/// Gives up with [`PollError::Timeout`] once `deadline` has passed; the last
/// probe runs at the deadline. Errors from `probe` end the poll immediately.
pub fn poll_until<T, E>(
    backoff: &Backoff,
    deadline: Duration,
    mut probe: impl FnMut(u32) -> Result<Option<T>, E>,
) -> Result<Polled<T>, PollError<E>> {
    let start = Instant::now();
    let mut attempt = 0u32;
    loop {
        let found = probe(attempt).map_err(PollError::Failed)?;
        let attempts = attempt + 1;
        if let Some(value) = found {
            return Ok(Polled {
                value,
                attempts,
                elapsed: start.elapsed(),
            });
        }
        let elapsed = start.elapsed();
        if elapsed >= deadline {
            return Err(PollError::Timeout { attempts, elapsed });
        }
        thread::sleep(backoff.delay(attempt).min(deadline - elapsed));
        attempt = attempts;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backoff(initial_ms: u64, max_ms: u64, factor: f64) -> Backoff {
        Backoff {
            initial: Duration::from_millis(initial_ms),
            max: Duration::from_millis(max_ms),
            factor,
        }
    }

    #[test]
    fn delays_grow_then_cap() {
        let b = backoff(100, 1000, 2.0);
        assert_eq!(b.delay(0), Duration::from_millis(100));
        assert_eq!(b.delay(1), Duration::from_millis(200));
        assert_eq!(b.delay(3), Duration::from_millis(800));
        assert_eq!(b.delay(4), Duration::from_millis(1000));
        assert_eq!(b.delay(500), Duration::from_millis(1000));
    }

    #[test]
    fn first_success_returns_immediately() {
        let b = backoff(10, 10, 1.0);
        let polled = poll_until::<_, ()>(&b, Duration::from_secs(1), |_| Ok(Some(7))).unwrap();
        assert_eq!(polled.value, 7);
        assert_eq!(polled.attempts, 1);
    }

    #[test]
    fn succeeds_after_retries() {
        let b = backoff(1, 5, 2.0);
        let polled = poll_until::<_, ()>(&b, Duration::from_secs(5), |attempt| {
            Ok(if attempt >= 3 { Some(attempt) } else { None })
        })
        .unwrap();
        assert_eq!(polled.value, 3);
        assert_eq!(polled.attempts, 4);
    }

    #[test]
    fn times_out_at_deadline() {
        let b = backoff(5, 20, 2.0);
        let start = Instant::now();
        let err = poll_until::<(), ()>(&b, Duration::from_millis(50), |_| Ok(None)).unwrap_err();
        match err {
            PollError::Timeout { attempts, elapsed } => {
                assert!(attempts >= 2);
                assert!(elapsed >= Duration::from_millis(50));
            }
            PollError::Failed(_) => panic!("expected timeout"),
        }
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn probe_error_stops_polling() {
        let b = backoff(1, 1, 1.0);
        let mut calls = 0;
        let err = poll_until::<(), _>(&b, Duration::from_secs(5), |_| {
            calls += 1;
            Err("boom")
        })
        .unwrap_err();
        assert!(matches!(err, PollError::Failed("boom")));
        assert_eq!(calls, 1);
    }
}
