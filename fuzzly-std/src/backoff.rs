use std::{cmp::min, time::Duration};

const INITIAL_WAIT_MS: u64 = 250;
const MAXIMUM_WAIT_MS: u64 = 30_000;
const EXP_BASE: u64 = 2;

/// An iterator of [`Duration`]s suitable for `tokio::time::sleep` between
/// retries of a fallible outbound call (email, webpush, object storage).
/// Exponential, capped at 30s.
pub fn get_backoff_iter() -> impl Iterator<Item = Duration> {
    iter_with_initial_wait_ms(INITIAL_WAIT_MS)
}

pub fn iter_with_initial_wait_ms(initial_wait_ms: u64) -> impl Iterator<Item = Duration> {
    debug_assert!(initial_wait_ms <= MAXIMUM_WAIT_MS);

    (0u32..).map(move |index| {
        let factor = EXP_BASE.saturating_pow(index);
        let wait_ms = initial_wait_ms.saturating_mul(factor);
        let bounded_wait_ms = min(wait_ms, MAXIMUM_WAIT_MS);
        Duration::from_millis(bounded_wait_ms)
    })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn no_integer_overflow() {
        let mut backoff_durations = get_backoff_iter();
        for _ in 0..200 {
            backoff_durations.next();
        }
    }

    #[test]
    fn caps_at_maximum() {
        let mut backoff_durations = get_backoff_iter();
        let last = backoff_durations.nth(20).unwrap();
        assert_eq!(last, Duration::from_millis(MAXIMUM_WAIT_MS));
    }
}
