use std::time::Duration;

/// Delay until the next interval boundary, measured from the loop start.
///
/// Anchoring to the start keeps runs on a fixed grid: a run that overruns the
/// interval waits for the following boundary instead of shifting the grid.
/// The result is always in `(0, interval]`.
pub fn next_delay(interval: Duration, elapsed_since_start: Duration) -> Duration {
    let interval_nanos = interval.as_nanos();
    if interval_nanos == 0 {
        return Duration::ZERO;
    }
    let into_slot = elapsed_since_start.as_nanos() % interval_nanos;
    let remaining = interval_nanos - into_slot;
    Duration::from_nanos(u64::try_from(remaining).unwrap_or(u64::MAX))
}
