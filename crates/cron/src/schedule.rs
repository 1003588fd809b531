//! Next-run computation for all schedule kinds.

use {
    chrono::{DateTime, Utc},
    cron::Schedule,
};

use crate::{Error, Result, types::CronSchedule};

/// Parse a cron expression, accepting the common 5-field form.
///
/// The `cron` crate wants `sec min hour dom month dow [year]`; a 5-field
/// expression gets a `0` seconds field prepended.
pub fn parse_cron_expr(expr: &str) -> Result<Schedule> {
    let trimmed = expr.trim();
    let normalized = if trimmed.split_whitespace().count() == 5 {
        format!("0 {trimmed}")
    } else {
        trimmed.to_string()
    };
    normalized
        .parse::<Schedule>()
        .map_err(|e| Error::invalid_expression(expr, e))
}

fn parse_tz(name: &str) -> Result<chrono_tz::Tz> {
    name.parse()
        .map_err(|_| Error::unknown_timezone(name))
}

/// Reject schedules that can never fire.
pub fn validate_schedule(schedule: &CronSchedule) -> Result<()> {
    match schedule {
        CronSchedule::Cron { cron, tz } => {
            parse_cron_expr(cron)?;
            if let Some(tz) = tz {
                parse_tz(tz)?;
            }
            Ok(())
        },
        CronSchedule::Interval { interval_ms } => {
            if *interval_ms == 0 {
                return Err(Error::invalid_job("intervalMs must be > 0"));
            }
            Ok(())
        },
        CronSchedule::Once { .. } => Ok(()),
    }
}

/// Next fire time strictly after `now_ms`, or `None` when the schedule is
/// exhausted.
pub fn compute_next_run(
    schedule: &CronSchedule,
    created_at_ms: u64,
    now_ms: u64,
) -> Result<Option<u64>> {
    match schedule {
        CronSchedule::Once { at } => Ok((*at > now_ms).then_some(*at)),
        CronSchedule::Interval { interval_ms } => {
            if *interval_ms == 0 {
                return Err(Error::invalid_job("intervalMs must be > 0"));
            }
            Ok(Some(next_grid_slot(created_at_ms, *interval_ms, now_ms)))
        },
        CronSchedule::Cron { cron, tz } => {
            let schedule = parse_cron_expr(cron)?;
            let now = i64::try_from(now_ms)
                .ok()
                .and_then(DateTime::<Utc>::from_timestamp_millis)
                .ok_or_else(|| Error::invalid_job(format!("time {now_ms}ms is out of range")))?;
            let next = match tz {
                Some(tz) => {
                    let tz = parse_tz(tz)?;
                    schedule
                        .after(&now.with_timezone(&tz))
                        .next()
                        .map(|dt| dt.timestamp_millis())
                },
                None => schedule.after(&now).next().map(|dt| dt.timestamp_millis()),
            };
            Ok(next.and_then(|ms| u64::try_from(ms).ok()))
        },
    }
}

/// First fire time when the scheduler (re)starts.
///
/// Once and interval jobs that missed their slot while the scheduler was down
/// get one immediate catch-up fire: the returned time is the earliest missed
/// slot, which is already due. Cron jobs skip missed fires.
pub fn startup_next_run(
    schedule: &CronSchedule,
    created_at_ms: u64,
    last_run_at_ms: Option<u64>,
    now_ms: u64,
) -> Result<Option<u64>> {
    match schedule {
        CronSchedule::Once { at } => Ok(last_run_at_ms.is_none().then_some(*at)),
        CronSchedule::Interval { interval_ms } => {
            if *interval_ms == 0 {
                return Err(Error::invalid_job("intervalMs must be > 0"));
            }
            let reference = last_run_at_ms.unwrap_or(created_at_ms);
            let missed = next_grid_slot(created_at_ms, *interval_ms, reference);
            Ok(Some(missed.min(next_grid_slot(
                created_at_ms,
                *interval_ms,
                now_ms,
            ))))
        },
        CronSchedule::Cron { .. } => compute_next_run(schedule, created_at_ms, now_ms),
    }
}

/// Smallest `anchor + k * interval` (k >= 1) strictly after `after`.
fn next_grid_slot(anchor: u64, interval: u64, after: u64) -> u64 {
    if after < anchor {
        return anchor.saturating_add(interval);
    }
    let elapsed = after - anchor;
    let k = elapsed / interval + 1;
    anchor.saturating_add(k.saturating_mul(interval))
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest};

    const T0: u64 = 1_700_000_000_000;

    fn every(ms: u64) -> CronSchedule {
        CronSchedule::Interval { interval_ms: ms }
    }

    #[rstest]
    #[case(T0, T0 + 60_000)]
    #[case(T0 + 59_999, T0 + 60_000)]
    #[case(T0 + 60_000, T0 + 120_000)]
    #[case(T0 + 130_000, T0 + 180_000)]
    #[case(T0 - 5_000, T0 + 60_000)]
    fn interval_fires_on_creation_grid(#[case] now: u64, #[case] expected: u64) {
        assert_eq!(
            compute_next_run(&every(60_000), T0, now).unwrap(),
            Some(expected)
        );
    }

    #[test]
    fn once_fires_only_in_future() {
        let s = CronSchedule::Once { at: T0 + 10 };
        assert_eq!(compute_next_run(&s, T0, T0).unwrap(), Some(T0 + 10));
        assert_eq!(compute_next_run(&s, T0, T0 + 10).unwrap(), None);
    }

    #[test]
    fn zero_interval_is_rejected() {
        assert!(compute_next_run(&every(0), T0, T0).is_err());
        assert!(validate_schedule(&every(0)).is_err());
    }

    #[rstest]
    #[case(u64::MAX)]
    #[case(i64::MAX as u64)]
    fn cron_rejects_out_of_range_now(#[case] now_ms: u64) {
        let s = CronSchedule::Cron {
            cron: "0 9 * * *".into(),
            tz: None,
        };
        assert!(compute_next_run(&s, 0, now_ms).is_err());
    }

    #[test]
    fn five_field_cron_runs_at_minute_zero() {
        let s = CronSchedule::Cron {
            cron: "0 9 * * *".into(),
            tz: None,
        };
        let now_ms = 1_706_745_600_000; // 2024-02-01T00:00:00Z
        let next = compute_next_run(&s, 0, now_ms).unwrap().unwrap();
        let dt = DateTime::from_timestamp_millis(next as i64).unwrap();
        assert_eq!(dt.format("%Y-%m-%d %H:%M").to_string(), "2024-02-01 09:00");
    }

    #[test]
    fn cron_respects_timezone() {
        let s = CronSchedule::Cron {
            cron: "0 9 * * *".into(),
            tz: Some("Europe/Paris".into()),
        };
        let now_ms = 1_706_745_600_000; // 2024-02-01T00:00:00Z
        let next = compute_next_run(&s, 0, now_ms).unwrap().unwrap();
        let dt = DateTime::from_timestamp_millis(next as i64).unwrap();
        // CET is UTC+1 in winter.
        assert_eq!(dt.format("%H:%M").to_string(), "08:00");
    }

    #[rstest]
    #[case("not valid", None)]
    #[case("0 9 * * *", Some("Mars/Olympus"))]
    fn invalid_cron_schedules(#[case] expr: &str, #[case] tz: Option<&str>) {
        let s = CronSchedule::Cron {
            cron: expr.into(),
            tz: tz.map(String::from),
        };
        assert!(validate_schedule(&s).is_err());
        assert!(compute_next_run(&s, 0, 1000).is_err());
    }

    #[test]
    fn startup_catch_up_fires_once_for_missed_interval_slots() {
        // Down for five slots: one catch-up at the first missed slot.
        let next = startup_next_run(&every(60_000), T0, None, T0 + 330_000).unwrap();
        assert_eq!(next, Some(T0 + 60_000));
        // After firing at "now", the next slot is back on the grid.
        assert_eq!(
            compute_next_run(&every(60_000), T0, T0 + 330_000).unwrap(),
            Some(T0 + 360_000)
        );
    }

    #[test]
    fn startup_without_missed_slot_keeps_grid() {
        let next =
            startup_next_run(&every(60_000), T0, Some(T0 + 120_000), T0 + 150_000).unwrap();
        assert_eq!(next, Some(T0 + 180_000));
    }

    #[test]
    fn startup_fires_overdue_once_job_only_if_never_run() {
        let s = CronSchedule::Once { at: T0 };
        assert_eq!(startup_next_run(&s, 0, None, T0 + 1).unwrap(), Some(T0));
        assert_eq!(startup_next_run(&s, 0, Some(T0), T0 + 1).unwrap(), None);
    }

    #[test]
    fn startup_skips_missed_cron_fires() {
        let s = CronSchedule::Cron {
            cron: "0 9 * * *".into(),
            tz: None,
        };
        let now_ms = 1_706_792_400_000; // 2024-02-01T13:00:00Z, 09:00 already passed
        let next = startup_next_run(&s, 0, None, now_ms).unwrap().unwrap();
        assert!(next > now_ms);
    }
}
