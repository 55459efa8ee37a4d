//! Bounded retry with a between-attempt recovery action.

/// Run `op` up to `attempts` times.
///
/// After a failed attempt, `recover` is given the error; it performs any
/// recovery side effect (sleep, purge) and returns whether the error is
/// worth another attempt. A `false` return, or running out of attempts,
/// surfaces the last error.
pub fn retry_with_recovery<T, E, Op, Rec>(
    attempts: u32,
    mut op: Op,
    mut recover: Rec,
) -> Result<T, E>
where
    Op: FnMut(u32) -> Result<T, E>,
    Rec: FnMut(&E) -> bool,
{
    debug_assert!(attempts > 0);
    let mut attempt = 0;
    loop {
        match op(attempt) {
            Ok(value) => return Ok(value),
            Err(err) => {
                attempt += 1;
                if attempt >= attempts || !recover(&err) {
                    return Err(err);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_attempt_success_skips_recovery() {
        let mut recoveries = 0;
        let result: Result<u32, ()> =
            retry_with_recovery(5, |_| Ok(7), |_| {
                recoveries += 1;
                true
            });
        assert_eq!(result, Ok(7));
        assert_eq!(recoveries, 0);
    }

    #[test]
    fn test_recovers_until_success() {
        let mut recoveries = 0;
        let result: Result<u32, &str> = retry_with_recovery(
            5,
            |attempt| if attempt < 3 { Err("nope") } else { Ok(attempt) },
            |_| {
                recoveries += 1;
                true
            },
        );
        assert_eq!(result, Ok(3));
        assert_eq!(recoveries, 3);
    }

    #[test]
    fn test_exhaustion_returns_last_error() {
        let mut calls = 0;
        let result: Result<(), &str> = retry_with_recovery(
            4,
            |_| {
                calls += 1;
                Err("still broken")
            },
            |_| true,
        );
        assert_eq!(result, Err("still broken"));
        assert_eq!(calls, 4);
    }

    #[test]
    fn test_fatal_error_stops_early() {
        let mut calls = 0;
        let result: Result<(), &str> = retry_with_recovery(
            5,
            |_| {
                calls += 1;
                Err("fatal")
            },
            |e| *e != "fatal",
        );
        assert_eq!(result, Err("fatal"));
        assert_eq!(calls, 1);
    }
}
