use crate::model::{Frequency, ScheduleConfiguration};
use anyhow::{Result, bail};
use chrono::{DateTime, Datelike, Days, LocalResult, NaiveDate, NaiveTime, TimeZone, Utc, Weekday};
use chrono_tz::Tz;

/// Earliest instant at `time_of_day` on a qualifying day that is strictly
/// after `max(from, start_date)`, or `None` when the schedule is over or the
/// configuration is malformed. All stepping is calendar arithmetic in the
/// configured zone, never raw 24h addition.
pub fn calculate_next_run(
    cfg: &ScheduleConfiguration,
    from: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    let tz: Tz = cfg.time_zone.parse().ok()?;
    let time = parse_hhmm(&cfg.time_of_day)?;
    let reference = from.max(cfg.start_date).with_timezone(&tz);

    let candidate = match cfg.frequency {
        Frequency::Daily => next_daily(reference, time, tz),
        Frequency::Weekly => next_weekly(reference, time, tz, cfg.day_of_week?),
        Frequency::Monthly => next_monthly(reference, time, tz, cfg.day_of_month?),
    }?;

    let candidate = candidate.with_timezone(&Utc);
    match cfg.end_date {
        Some(end) if candidate > end => None,
        _ => Some(candidate),
    }
}

/// Load/add-time validation with named reasons; `calculate_next_run` itself
/// fails closed instead of erroring.
pub fn validate(cfg: &ScheduleConfiguration) -> Result<()> {
    if parse_hhmm(&cfg.time_of_day).is_none() {
        bail!("schedule.time_of_day must be HH:mm, got {:?}", cfg.time_of_day);
    }
    if cfg.time_zone.parse::<Tz>().is_err() {
        bail!("unknown time zone: {}", cfg.time_zone);
    }
    match cfg.frequency {
        Frequency::Daily => {}
        Frequency::Weekly => {
            let Some(day) = cfg.day_of_week else {
                bail!("day_of_week is required for weekly schedules");
            };
            if !(1..=7).contains(&day) {
                bail!("day_of_week must be 1..=7 (Sunday = 1)");
            }
        }
        Frequency::Monthly => {
            let Some(day) = cfg.day_of_month else {
                bail!("day_of_month is required for monthly schedules");
            };
            if !(1..=31).contains(&day) {
                bail!("day_of_month must be 1..=31");
            }
        }
    }
    if let Some(end) = cfg.end_date {
        if end < cfg.start_date {
            bail!("end_date is before start_date");
        }
    }
    Ok(())
}

pub fn schedule_description(cfg: &ScheduleConfiguration) -> String {
    match cfg.frequency {
        Frequency::Daily => format!("Daily at {}", cfg.time_of_day),
        Frequency::Weekly => match cfg.day_of_week.filter(|d| (1..=7).contains(d)) {
            Some(day) => format!("{} at {}", weekday_plural(day), cfg.time_of_day),
            None => format!("Weekly at {}", cfg.time_of_day),
        },
        Frequency::Monthly => match cfg.day_of_month {
            Some(day) => format!("Monthly on the {} at {}", ordinal(day), cfg.time_of_day),
            None => format!("Monthly at {}", cfg.time_of_day),
        },
    }
}

fn parse_hhmm(time: &str) -> Option<NaiveTime> {
    let (hour, minute) = time.split_once(':')?;
    if hour.is_empty() || minute.len() != 2 {
        return None;
    }
    let hour: u32 = hour.parse().ok()?;
    let minute: u32 = minute.parse().ok()?;
    NaiveTime::from_hms_opt(hour, minute, 0)
}

fn next_daily(reference: DateTime<Tz>, time: NaiveTime, tz: Tz) -> Option<DateTime<Tz>> {
    let mut date = reference.date_naive();
    let mut candidate = zoned_datetime(tz, date, time)?;
    if candidate <= reference {
        date = date.checked_add_days(Days::new(1))?;
        candidate = zoned_datetime(tz, date, time)?;
    }
    Some(candidate)
}

fn next_weekly(reference: DateTime<Tz>, time: NaiveTime, tz: Tz, day_of_week: u8) -> Option<DateTime<Tz>> {
    let target = weekday_from_sunday_one(day_of_week)?;
    let mut date = reference.date_naive();

    for _ in 0..8 {
        if date.weekday() == target {
            let candidate = zoned_datetime(tz, date, time)?;
            if candidate > reference {
                return Some(candidate);
            }
        }
        date = date.checked_add_days(Days::new(1))?;
    }
    None
}

fn next_monthly(reference: DateTime<Tz>, time: NaiveTime, tz: Tz, day_of_month: u8) -> Option<DateTime<Tz>> {
    if !(1..=31).contains(&day_of_month) {
        return None;
    }
    let mut year = reference.year();
    let mut month = reference.month();

    // The configured day is re-targeted and re-clamped every month, so a
    // schedule for the 31st lands on Feb 28/29 and back on Mar 31.
    for _ in 0..24 {
        let day = u32::from(day_of_month).min(days_in_month(year, month)?);
        let date = NaiveDate::from_ymd_opt(year, month, day)?;
        if let Some(candidate) = zoned_datetime(tz, date, time) {
            if candidate > reference {
                return Some(candidate);
            }
        }

        if month == 12 {
            year += 1;
            month = 1;
        } else {
            month += 1;
        }
    }
    None
}

/// Resolves a wall-clock time in `tz`. Ambiguous instants (fall-back) take
/// the earlier offset; nonexistent instants (spring-forward gap) roll forward
/// minute by minute to the first representable one.
fn zoned_datetime(tz: Tz, date: NaiveDate, time: NaiveTime) -> Option<DateTime<Tz>> {
    let mut naive = date.and_time(time);
    for _ in 0..=180 {
        match tz.from_local_datetime(&naive) {
            LocalResult::Single(dt) => return Some(dt),
            LocalResult::Ambiguous(earlier, _) => return Some(earlier),
            LocalResult::None => {
                naive = naive.checked_add_signed(chrono::TimeDelta::minutes(1))?;
            }
        }
    }
    None
}

fn weekday_from_sunday_one(v: u8) -> Option<Weekday> {
    match v {
        1 => Some(Weekday::Sun),
        2 => Some(Weekday::Mon),
        3 => Some(Weekday::Tue),
        4 => Some(Weekday::Wed),
        5 => Some(Weekday::Thu),
        6 => Some(Weekday::Fri),
        7 => Some(Weekday::Sat),
        _ => None,
    }
}

fn weekday_plural(v: u8) -> &'static str {
    match v {
        1 => "Sundays",
        2 => "Mondays",
        3 => "Tuesdays",
        4 => "Wednesdays",
        5 => "Thursdays",
        6 => "Fridays",
        _ => "Saturdays",
    }
}

fn ordinal(day: u8) -> String {
    let suffix = match day % 100 {
        11..=13 => "th",
        _ => match day % 10 {
            1 => "st",
            2 => "nd",
            3 => "rd",
            _ => "th",
        },
    };
    format!("{day}{suffix}")
}

fn days_in_month(year: i32, month: u32) -> Option<u32> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)?;
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    let next = NaiveDate::from_ymd_opt(next_year, next_month, 1)?;
    Some((next - first).num_days() as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDateTime;

    fn utc(s: &str) -> DateTime<Utc> {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
            .expect("test timestamp")
            .and_utc()
    }

    fn daily(time: &str, zone: &str, start: &str) -> ScheduleConfiguration {
        ScheduleConfiguration {
            frequency: Frequency::Daily,
            time_of_day: time.to_string(),
            time_zone: zone.to_string(),
            day_of_week: None,
            day_of_month: None,
            start_date: utc(start),
            end_date: None,
        }
    }

    #[test]
    fn daily_before_time_runs_same_day() {
        let cfg = daily("09:00", "UTC", "2024-01-01 00:00:00");
        let next = calculate_next_run(&cfg, utc("2024-01-01 08:59:59"));
        assert_eq!(next, Some(utc("2024-01-01 09:00:00")));
    }

    #[test]
    fn daily_at_or_after_time_runs_next_day() {
        let cfg = daily("09:00", "UTC", "2024-01-01 00:00:00");
        assert_eq!(
            calculate_next_run(&cfg, utc("2024-01-01 09:00:00")),
            Some(utc("2024-01-02 09:00:00"))
        );
        assert_eq!(
            calculate_next_run(&cfg, utc("2024-01-01 10:00:00")),
            Some(utc("2024-01-02 09:00:00"))
        );
    }

    #[test]
    fn daily_respects_future_start_date() {
        let cfg = daily("09:00", "UTC", "2024-02-01 00:00:00");
        let next = calculate_next_run(&cfg, utc("2024-01-01 00:00:00"));
        assert_eq!(next, Some(utc("2024-02-01 09:00:00")));
    }

    #[test]
    fn daily_crossing_spring_forward_neither_skips_nor_doubles() {
        // America/New_York jumps 02:00 -> 03:00 on 2024-03-10.
        let cfg = daily("09:00", "America/New_York", "2024-01-01 00:00:00");
        // 2024-03-09 08:00 EST == 13:00 UTC; same-day 09:00 EST == 14:00 UTC.
        let before = calculate_next_run(&cfg, utc("2024-03-09 13:00:00")).unwrap();
        assert_eq!(before, utc("2024-03-09 14:00:00"));
        // One second past it, the next fire is 2024-03-10 09:00 EDT == 13:00
        // UTC: 23 hours later in absolute terms, one calendar day locally.
        let after = calculate_next_run(&cfg, utc("2024-03-09 14:00:01")).unwrap();
        assert_eq!(after, utc("2024-03-10 13:00:00"));
    }

    #[test]
    fn daily_inside_spring_forward_gap_rolls_to_first_valid_instant() {
        // 02:30 does not exist on 2024-03-10 in New York; expect 03:00 EDT.
        let cfg = daily("02:30", "America/New_York", "2024-01-01 00:00:00");
        let next = calculate_next_run(&cfg, utc("2024-03-10 06:00:00")).unwrap();
        assert_eq!(next, utc("2024-03-10 07:00:00"));
    }

    #[test]
    fn daily_ambiguous_fall_back_takes_earlier_offset() {
        // 01:30 occurs twice on 2024-11-03 in New York; EDT first (05:30 UTC).
        let cfg = daily("01:30", "America/New_York", "2024-01-01 00:00:00");
        let next = calculate_next_run(&cfg, utc("2024-11-03 00:00:00")).unwrap();
        assert_eq!(next, utc("2024-11-03 05:30:00"));
    }

    #[test]
    fn weekly_wednesday_rolls_to_following_monday() {
        // 2024-01-03 is a Wednesday; day 2 is Monday.
        let cfg = ScheduleConfiguration {
            frequency: Frequency::Weekly,
            day_of_week: Some(2),
            ..daily("09:00", "UTC", "2024-01-01 00:00:00")
        };
        let next = calculate_next_run(&cfg, utc("2024-01-03 12:00:00"));
        assert_eq!(next, Some(utc("2024-01-08 09:00:00")));
    }

    #[test]
    fn weekly_same_day_before_time_fires_today() {
        // 2024-01-07 is a Sunday; day 1 is Sunday.
        let cfg = ScheduleConfiguration {
            frequency: Frequency::Weekly,
            day_of_week: Some(1),
            ..daily("09:00", "UTC", "2024-01-01 00:00:00")
        };
        assert_eq!(
            calculate_next_run(&cfg, utc("2024-01-07 08:00:00")),
            Some(utc("2024-01-07 09:00:00"))
        );
        assert_eq!(
            calculate_next_run(&cfg, utc("2024-01-07 09:00:00")),
            Some(utc("2024-01-14 09:00:00"))
        );
    }

    #[test]
    fn monthly_day_31_clamps_in_short_months() {
        let cfg = ScheduleConfiguration {
            frequency: Frequency::Monthly,
            day_of_month: Some(31),
            ..daily("09:00", "UTC", "2024-01-01 00:00:00")
        };
        let next = calculate_next_run(&cfg, utc("2024-04-02 00:00:00"));
        assert_eq!(next, Some(utc("2024-04-30 09:00:00")));
    }

    #[test]
    fn monthly_reclamps_per_month_across_the_february_chain() {
        let cfg = ScheduleConfiguration {
            frequency: Frequency::Monthly,
            day_of_month: Some(31),
            ..daily("09:00", "UTC", "2024-01-01 00:00:00")
        };
        let jan = calculate_next_run(&cfg, utc("2024-01-15 00:00:00")).unwrap();
        assert_eq!(jan, utc("2024-01-31 09:00:00"));
        let feb = calculate_next_run(&cfg, jan + chrono::TimeDelta::seconds(1)).unwrap();
        assert_eq!(feb, utc("2024-02-29 09:00:00"));
        let mar = calculate_next_run(&cfg, feb + chrono::TimeDelta::seconds(1)).unwrap();
        assert_eq!(mar, utc("2024-03-31 09:00:00"));
    }

    #[test]
    fn monthly_day_31_in_non_leap_february() {
        let cfg = ScheduleConfiguration {
            frequency: Frequency::Monthly,
            day_of_month: Some(31),
            ..daily("09:00", "UTC", "2023-01-01 00:00:00")
        };
        let next = calculate_next_run(&cfg, utc("2023-02-01 00:00:00"));
        assert_eq!(next, Some(utc("2023-02-28 09:00:00")));
    }

    #[test]
    fn end_date_terminates_the_schedule() {
        let mut cfg = daily("09:00", "UTC", "2024-01-01 00:00:00");
        cfg.end_date = Some(utc("2024-01-02 09:00:00"));
        assert_eq!(
            calculate_next_run(&cfg, utc("2024-01-02 08:00:00")),
            Some(utc("2024-01-02 09:00:00"))
        );
        assert_eq!(calculate_next_run(&cfg, utc("2024-01-02 09:00:00")), None);
    }

    #[test]
    fn result_never_exceeds_end_date() {
        let mut cfg = daily("09:00", "UTC", "2024-01-01 00:00:00");
        cfg.end_date = Some(utc("2024-06-01 00:00:00"));
        for from in [
            "2024-01-01 00:00:00",
            "2024-05-31 08:00:00",
            "2024-05-31 10:00:00",
            "2024-07-01 00:00:00",
        ] {
            match calculate_next_run(&cfg, utc(from)) {
                Some(r) => assert!(r <= cfg.end_date.unwrap()),
                None => {}
            }
        }
    }

    #[test]
    fn malformed_configuration_fails_closed() {
        let now = utc("2024-01-01 00:00:00");
        assert_eq!(calculate_next_run(&daily("9x:00", "UTC", "2024-01-01 00:00:00"), now), None);
        assert_eq!(calculate_next_run(&daily("09:0", "UTC", "2024-01-01 00:00:00"), now), None);
        assert_eq!(
            calculate_next_run(&daily("09:00", "Mars/Olympus", "2024-01-01 00:00:00"), now),
            None
        );

        let weekly_missing_day = ScheduleConfiguration {
            frequency: Frequency::Weekly,
            ..daily("09:00", "UTC", "2024-01-01 00:00:00")
        };
        assert_eq!(calculate_next_run(&weekly_missing_day, now), None);

        let monthly_missing_day = ScheduleConfiguration {
            frequency: Frequency::Monthly,
            ..daily("09:00", "UTC", "2024-01-01 00:00:00")
        };
        assert_eq!(calculate_next_run(&monthly_missing_day, now), None);
    }

    #[test]
    fn validate_names_the_broken_field() {
        let mut cfg = daily("25:00", "UTC", "2024-01-01 00:00:00");
        assert!(validate(&cfg).unwrap_err().to_string().contains("time_of_day"));

        cfg = daily("09:00", "Nowhere/Here", "2024-01-01 00:00:00");
        assert!(validate(&cfg).unwrap_err().to_string().contains("time zone"));

        cfg = ScheduleConfiguration {
            frequency: Frequency::Weekly,
            day_of_week: Some(8),
            ..daily("09:00", "UTC", "2024-01-01 00:00:00")
        };
        assert!(validate(&cfg).unwrap_err().to_string().contains("day_of_week"));

        cfg = daily("09:00", "UTC", "2024-06-01 00:00:00");
        cfg.end_date = Some(utc("2024-01-01 00:00:00"));
        assert!(validate(&cfg).unwrap_err().to_string().contains("end_date"));
    }

    #[test]
    fn descriptions_use_english_ordinals() {
        let base = daily("09:00", "UTC", "2024-01-01 00:00:00");
        assert_eq!(schedule_description(&base), "Daily at 09:00");

        let weekly = ScheduleConfiguration {
            frequency: Frequency::Weekly,
            day_of_week: Some(2),
            ..base.clone()
        };
        assert_eq!(schedule_description(&weekly), "Mondays at 09:00");

        for (day, expected) in [
            (1u8, "Monthly on the 1st at 09:00"),
            (2, "Monthly on the 2nd at 09:00"),
            (3, "Monthly on the 3rd at 09:00"),
            (4, "Monthly on the 4th at 09:00"),
            (11, "Monthly on the 11th at 09:00"),
            (12, "Monthly on the 12th at 09:00"),
            (13, "Monthly on the 13th at 09:00"),
            (21, "Monthly on the 21st at 09:00"),
            (31, "Monthly on the 31st at 09:00"),
        ] {
            let monthly = ScheduleConfiguration {
                frequency: Frequency::Monthly,
                day_of_month: Some(day),
                ..base.clone()
            };
            assert_eq!(schedule_description(&monthly), expected);
        }
    }
}
