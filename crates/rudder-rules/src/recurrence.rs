//! Recurrence expansion in naive local time
//!
//! Timezone conversion happens only at the edges: callers convert `now` into
//! wall-clock time with [`Recurrence::to_local`], expand occurrences on naive
//! values, and convert results back with [`Recurrence::to_utc`]. Expansion is
//! delegated to `rrule` with UTC standing in for wall-clock time.

use crate::error::{Result, RuleError};
use chrono::{DateTime, Duration, LocalResult, Month, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use rrule::{NWeekday, RRule, RRuleSet};
use rudder_types::{Frequency, RecurrenceSpec};

/// Occurrences returned per lookback query
const MAX_OCCURRENCES: u16 = 1000;

/// Validated recurrence with a parsed timezone
#[derive(Debug, Clone)]
pub struct Recurrence {
    spec: RecurrenceSpec,
    tz: Tz,
    set: RRuleSet,
}

fn wall_clock(local: NaiveDateTime) -> DateTime<rrule::Tz> {
    rrule::Tz::UTC.from_utc_datetime(&local)
}

fn frequency(frequency: Frequency) -> rrule::Frequency {
    match frequency {
        Frequency::Daily => rrule::Frequency::Daily,
        Frequency::Weekly => rrule::Frequency::Weekly,
        Frequency::Monthly => rrule::Frequency::Monthly,
        Frequency::Yearly => rrule::Frequency::Yearly,
    }
}

fn invalid(message: impl Into<String>) -> RuleError {
    RuleError::InvalidRecurrence(message.into())
}

fn build_set(spec: &RecurrenceSpec) -> Result<RRuleSet> {
    let interval = u16::try_from(spec.interval)
        .ok()
        .filter(|i| *i > 0)
        .ok_or_else(|| invalid("interval must be between 1 and 65535"))?;

    let months = spec
        .by_month
        .iter()
        .map(|m| {
            u8::try_from(*m)
                .ok()
                .and_then(|m| Month::try_from(m).ok())
                .ok_or_else(|| invalid("by_month values must be 1-12"))
        })
        .collect::<Result<Vec<Month>>>()?;

    let month_days = spec
        .by_month_day
        .iter()
        .map(|d| {
            i8::try_from(*d)
                .ok()
                .filter(|d| (1..=31).contains(d))
                .ok_or_else(|| invalid("by_month_day values must be 1-31"))
        })
        .collect::<Result<Vec<i8>>>()?;

    let mut rule = RRule::new(frequency(spec.frequency)).interval(interval);
    if !spec.by_weekday.is_empty() {
        rule = rule.by_weekday(spec.by_weekday.iter().copied().map(NWeekday::Every).collect());
    }
    if !months.is_empty() {
        rule = rule.by_month(&months);
    }
    if !month_days.is_empty() {
        rule = rule.by_month_day(month_days);
    }
    if let Some(until) = spec.until {
        rule = rule.until(wall_clock(until));
    }

    rule.build(wall_clock(spec.dtstart))
        .map_err(|e| invalid(e.to_string()))
}

impl Recurrence {
    pub fn new(spec: RecurrenceSpec) -> Result<Self> {
        let tz: Tz = spec
            .timezone
            .parse()
            .map_err(|_| RuleError::InvalidTimezone(spec.timezone.clone()))?;

        if let Some(dtend) = spec.dtend {
            if dtend <= spec.dtstart {
                return Err(invalid("dtend must be after dtstart"));
            }
        }
        let set = build_set(&spec)?;

        Ok(Self { spec, tz, set })
    }

    pub fn spec(&self) -> &RecurrenceSpec {
        &self.spec
    }

    /// Window length, when `dtend` is configured
    pub fn duration(&self) -> Option<Duration> {
        self.spec.dtend.map(|end| end - self.spec.dtstart)
    }

    pub fn to_local(&self, instant: DateTime<Utc>) -> NaiveDateTime {
        instant.with_timezone(&self.tz).naive_local()
    }

    /// Map a wall-clock time back to UTC
    ///
    /// Ambiguous times (clocks going back) take the later instant; times in a
    /// gap (clocks going forward) take the first valid instant after it.
    pub fn to_utc(&self, local: NaiveDateTime) -> DateTime<Utc> {
        match self.tz.from_local_datetime(&local) {
            LocalResult::Single(t) => t.with_timezone(&Utc),
            LocalResult::Ambiguous(_, later) => later.with_timezone(&Utc),
            LocalResult::None => {
                let shifted = local + Duration::hours(1);
                match self.tz.from_local_datetime(&shifted).earliest() {
                    Some(t) => t.with_timezone(&Utc),
                    None => Utc.from_utc_datetime(&local),
                }
            }
        }
    }

    /// Latest occurrence start at or before `local_now`, looking back at most
    /// `max_days` calendar days
    pub fn previous_occurrence(
        &self,
        local_now: NaiveDateTime,
        max_days: i64,
    ) -> Option<NaiveDateTime> {
        let earliest = local_now.date().checked_sub_signed(Duration::days(max_days))?;
        let from = earliest.and_hms_opt(0, 0, 0)? - Duration::seconds(1);
        let to = local_now + Duration::seconds(1);

        self.set
            .clone()
            .after(wall_clock(from))
            .before(wall_clock(to))
            .all(MAX_OCCURRENCES)
            .dates
            .into_iter()
            .map(|occurrence| occurrence.naive_utc())
            .filter(|occurrence| *occurrence <= local_now)
            .last()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Weekday;

    fn at(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M").unwrap()
    }

    #[test]
    fn test_rejects_invalid_specs() {
        let spec = RecurrenceSpec::new(Frequency::Daily, at("2024-01-01 09:00"))
            .with_timezone("Mars/Olympus_Mons");
        assert!(matches!(
            Recurrence::new(spec),
            Err(RuleError::InvalidTimezone(_))
        ));

        let spec = RecurrenceSpec::new(Frequency::Daily, at("2024-01-01 09:00"))
            .with_dtend(at("2024-01-01 08:00"));
        assert!(matches!(
            Recurrence::new(spec),
            Err(RuleError::InvalidRecurrence(_))
        ));

        let mut spec = RecurrenceSpec::new(Frequency::Monthly, at("2024-01-01 09:00"));
        spec.by_month_day = vec![32];
        assert!(matches!(
            Recurrence::new(spec),
            Err(RuleError::InvalidRecurrence(_))
        ));

        let mut spec = RecurrenceSpec::new(Frequency::Daily, at("2024-01-01 09:00"));
        spec.interval = 0;
        assert!(matches!(
            Recurrence::new(spec),
            Err(RuleError::InvalidRecurrence(_))
        ));
    }

    #[test]
    fn test_yearly_by_month_and_day() {
        let mut spec = RecurrenceSpec::new(Frequency::Yearly, at("2023-12-24 00:00"));
        spec.by_month = vec![12];
        spec.by_month_day = vec![24, 31];
        let r = Recurrence::new(spec).unwrap();

        assert_eq!(
            r.previous_occurrence(at("2024-12-30 12:00"), 10),
            Some(at("2024-12-24 00:00"))
        );
        assert_eq!(r.previous_occurrence(at("2024-06-01 12:00"), 30), None);
    }

    #[test]
    fn test_daily_with_interval() {
        let mut spec = RecurrenceSpec::new(Frequency::Daily, at("2024-01-01 09:00"));
        spec.interval = 2;
        let r = Recurrence::new(spec).unwrap();

        assert_eq!(
            r.previous_occurrence(at("2024-01-04 12:00"), 5),
            Some(at("2024-01-03 09:00"))
        );
        assert_eq!(
            r.previous_occurrence(at("2024-01-05 08:00"), 5),
            Some(at("2024-01-03 09:00"))
        );
        assert_eq!(r.previous_occurrence(at("2023-12-31 10:00"), 5), None);
    }

    #[test]
    fn test_weekly_by_weekday() {
        // 2024-01-01 is a Monday
        let mut spec = RecurrenceSpec::new(Frequency::Weekly, at("2024-01-01 22:00"));
        spec.by_weekday = vec![Weekday::Tue, Weekday::Thu];
        let r = Recurrence::new(spec).unwrap();

        assert_eq!(
            r.previous_occurrence(at("2024-01-12 10:00"), 14),
            Some(at("2024-01-11 22:00"))
        );
    }

    #[test]
    fn test_monthly_skips_short_months() {
        let r = Recurrence::new(RecurrenceSpec::new(
            Frequency::Monthly,
            at("2024-01-31 00:00"),
        ))
        .unwrap();
        assert_eq!(
            r.previous_occurrence(at("2024-03-15 00:00"), 60),
            Some(at("2024-01-31 00:00"))
        );
        assert_eq!(
            r.previous_occurrence(at("2024-03-31 01:00"), 60),
            Some(at("2024-03-31 00:00"))
        );
    }

    #[test]
    fn test_until_bounds_occurrences() {
        let mut spec = RecurrenceSpec::new(Frequency::Daily, at("2024-01-01 09:00"));
        spec.until = Some(at("2024-01-05 00:00"));
        let r = Recurrence::new(spec).unwrap();
        assert_eq!(
            r.previous_occurrence(at("2024-01-07 10:00"), 10),
            Some(at("2024-01-04 09:00"))
        );
    }

    #[test]
    fn test_local_conversion_round_trip() {
        let spec = RecurrenceSpec::new(Frequency::Daily, at("2024-01-01 09:00"))
            .with_timezone("America/New_York");
        let r = Recurrence::new(spec).unwrap();

        let utc = Utc.from_utc_datetime(&at("2024-07-01 13:30"));
        assert_eq!(r.to_local(utc), at("2024-07-01 09:30"));
        assert_eq!(r.to_utc(at("2024-07-01 09:30")), utc);

        // 02:30 does not exist on 2024-03-10 in New York
        let gap = r.to_utc(at("2024-03-10 02:30"));
        assert_eq!(gap, Utc.from_utc_datetime(&at("2024-03-10 07:30")));
    }
}
