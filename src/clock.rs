//! Time source for every "now" and day-boundary computation.
//!
//! Local wall-clock times are resolved to instants here and nowhere else.
//! Nonexistent local times (spring-forward gaps) shift forward past the gap;
//! ambiguous ones (fall-back overlaps) resolve to the earlier instant.

use std::sync::Mutex;

use chrono::{
    DateTime, Duration, FixedOffset, Local, LocalResult, NaiveDate, NaiveDateTime, NaiveTime,
    Offset, TimeZone, Utc,
};

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// Wall-clock reading of `instant` in the owner's zone.
    fn to_local(&self, instant: DateTime<Utc>) -> NaiveDateTime;

    /// Instant at which the owner's wall clock reads `local`.
    fn from_local(&self, local: NaiveDateTime) -> DateTime<Utc>;

    fn today(&self) -> NaiveDate {
        self.to_local(self.now()).date()
    }

    fn local_date(&self, instant: DateTime<Utc>) -> NaiveDate {
        self.to_local(instant).date()
    }

    /// Half-open `[start, end)` covering local day `day`. Not always 24h.
    fn day_bounds(&self, day: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
        let start = self.from_local(day.and_time(NaiveTime::MIN));
        let end = match day.succ_opt() {
            Some(next) => self.from_local(next.and_time(NaiveTime::MIN)),
            None => start + Duration::days(1),
        };
        (start, end)
    }
}

/// Resolve a wall-clock time in `tz` to an instant.
pub fn resolve_local<Tz: TimeZone>(tz: &Tz, local: NaiveDateTime) -> DateTime<Utc> {
    match tz.from_local_datetime(&local) {
        LocalResult::Single(dt) => dt.with_timezone(&Utc),
        LocalResult::Ambiguous(earliest, _) => earliest.with_timezone(&Utc),
        LocalResult::None => {
            // Inside a gap: read the wall time with the offset in force
            // before it, which moves it forward by the gap length.
            let before = (1..=48)
                .find_map(|h| tz.from_local_datetime(&(local - Duration::hours(h))).earliest());
            let offset = before.map_or(0, |dt| dt.offset().fix().local_minus_utc());
            Utc.from_utc_datetime(&(local - Duration::seconds(offset as i64)))
        }
    }
}

/// The device clock in the system time zone.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn to_local(&self, instant: DateTime<Utc>) -> NaiveDateTime {
        instant.with_timezone(&Local).naive_local()
    }

    fn from_local(&self, local: NaiveDateTime) -> DateTime<Utc> {
        resolve_local(&Local, local)
    }
}

/// Settable clock with an optional offset schedule, for tests and replays.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
    base_offset: FixedOffset,
    transitions: Vec<(DateTime<Utc>, FixedOffset)>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>, offset: FixedOffset) -> Self {
        Self {
            now: Mutex::new(now),
            base_offset: offset,
            transitions: Vec::new(),
        }
    }

    /// A clock whose local time equals UTC.
    pub fn utc(now: DateTime<Utc>) -> Self {
        Self::new(now, Utc.fix())
    }

    /// From `at` onwards the zone uses `offset`.
    pub fn with_transition(mut self, at: DateTime<Utc>, offset: FixedOffset) -> Self {
        self.transitions.push((at, offset));
        self.transitions.sort_by_key(|(at, _)| *at);
        self
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut guard = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *guard += by;
    }

    fn offset_at(&self, instant: DateTime<Utc>) -> FixedOffset {
        self.transitions
            .iter()
            .rev()
            .find(|(at, _)| *at <= instant)
            .map(|(_, offset)| *offset)
            .unwrap_or(self.base_offset)
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn to_local(&self, instant: DateTime<Utc>) -> NaiveDateTime {
        instant.with_timezone(&self.offset_at(instant)).naive_local()
    }

    fn from_local(&self, local: NaiveDateTime) -> DateTime<Utc> {
        let offsets = std::iter::once(self.base_offset).chain(self.transitions.iter().map(|(_, o)| *o));
        let candidates: Vec<DateTime<Utc>> = offsets
            .map(|offset| {
                let utc = Utc.from_utc_datetime(&(local - Duration::seconds(offset.local_minus_utc() as i64)));
                (utc, offset)
            })
            .filter_map(|(utc, offset)| (self.offset_at(utc) == offset).then_some(utc))
            .collect();

        if let Some(earliest) = candidates.iter().min() {
            return *earliest;
        }
        // Inside a gap: read the wall time with the pre-gap offset, which
        // lands past the transition.
        std::iter::once(self.base_offset)
            .chain(self.transitions.iter().map(|(_, o)| *o))
            .map(|offset| Utc.from_utc_datetime(&(local - Duration::seconds(offset.local_minus_utc() as i64))))
            .max()
            .unwrap_or_else(|| Utc.from_utc_datetime(&local))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hours(h: i32) -> FixedOffset {
        FixedOffset::east_opt(h * 3600).unwrap()
    }

    /// UTC+1 switching to UTC+2 on 2026-03-29 01:00 UTC, back on 2026-10-25 01:00 UTC.
    fn dst_clock() -> ManualClock {
        ManualClock::new(Utc.with_ymd_and_hms(2026, 3, 28, 12, 0, 0).unwrap(), hours(1))
            .with_transition(Utc.with_ymd_and_hms(2026, 3, 29, 1, 0, 0).unwrap(), hours(2))
            .with_transition(Utc.with_ymd_and_hms(2026, 10, 25, 1, 0, 0).unwrap(), hours(1))
    }

    fn local(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d).unwrap().and_hms_opt(h, min, 0).unwrap()
    }

    #[test]
    fn spring_forward_day_is_23_hours() {
        let clock = dst_clock();
        let (start, end) = clock.day_bounds(NaiveDate::from_ymd_opt(2026, 3, 29).unwrap());
        assert_eq!(end - start, Duration::hours(23));
    }

    #[test]
    fn fall_back_day_is_25_hours() {
        let clock = dst_clock();
        let (start, end) = clock.day_bounds(NaiveDate::from_ymd_opt(2026, 10, 25).unwrap());
        assert_eq!(end - start, Duration::hours(25));
    }

    /// Central European rules for 2026 as a real `TimeZone`.
    #[derive(Debug, Clone, Copy)]
    struct CentralEurope;

    impl CentralEurope {
        fn offset_at(utc: &NaiveDateTime) -> FixedOffset {
            if *utc >= local(2026, 3, 29, 1, 0) && *utc < local(2026, 10, 25, 1, 0) {
                hours(2)
            } else {
                hours(1)
            }
        }
    }

    impl TimeZone for CentralEurope {
        type Offset = FixedOffset;

        fn from_offset(_: &FixedOffset) -> Self {
            CentralEurope
        }

        fn offset_from_local_date(&self, local: &NaiveDate) -> LocalResult<FixedOffset> {
            self.offset_from_local_datetime(&local.and_time(NaiveTime::MIN))
        }

        fn offset_from_local_datetime(&self, local: &NaiveDateTime) -> LocalResult<FixedOffset> {
            let fits: Vec<FixedOffset> = [hours(1), hours(2)]
                .into_iter()
                .filter(|o| Self::offset_at(&(*local - Duration::seconds(o.local_minus_utc() as i64))) == *o)
                .collect();
            match fits.as_slice() {
                [only] => LocalResult::Single(*only),
                [standard, summer] => LocalResult::Ambiguous(*summer, *standard),
                _ => LocalResult::None,
            }
        }

        fn offset_from_utc_date(&self, utc: &NaiveDate) -> FixedOffset {
            Self::offset_at(&utc.and_time(NaiveTime::MIN))
        }

        fn offset_from_utc_datetime(&self, utc: &NaiveDateTime) -> FixedOffset {
            Self::offset_at(utc)
        }
    }

    #[test]
    fn resolve_local_moves_gap_times_by_the_gap_length() {
        let resolved = resolve_local(&CentralEurope, local(2026, 3, 29, 2, 30));
        assert_eq!(resolved, Utc.with_ymd_and_hms(2026, 3, 29, 1, 30, 0).unwrap());
        assert_eq!(resolved.with_timezone(&CentralEurope).naive_local(), local(2026, 3, 29, 3, 30));
    }

    #[test]
    fn resolve_local_takes_earlier_instant_in_overlap() {
        let resolved = resolve_local(&CentralEurope, local(2026, 10, 25, 2, 30));
        assert_eq!(resolved, Utc.with_ymd_and_hms(2026, 10, 25, 0, 30, 0).unwrap());
        let plain = resolve_local(&CentralEurope, local(2026, 6, 1, 8, 0));
        assert_eq!(plain, Utc.with_ymd_and_hms(2026, 6, 1, 6, 0, 0).unwrap());
    }

    #[test]
    fn gap_times_shift_forward() {
        let clock = dst_clock();
        let resolved = clock.from_local(local(2026, 3, 29, 2, 30));
        assert_eq!(clock.to_local(resolved), local(2026, 3, 29, 3, 30));
    }

    #[test]
    fn ambiguous_times_take_the_earlier_instant() {
        let clock = dst_clock();
        let resolved = clock.from_local(local(2026, 10, 25, 2, 30));
        assert_eq!(resolved, Utc.with_ymd_and_hms(2026, 10, 25, 0, 30, 0).unwrap());
    }

    #[test]
    fn today_follows_local_offset() {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2026, 1, 1, 23, 30, 0).unwrap(), hours(2));
        assert_eq!(clock.today(), NaiveDate::from_ymd_opt(2026, 1, 2).unwrap());
        clock.advance(Duration::days(1));
        assert_eq!(clock.today(), NaiveDate::from_ymd_opt(2026, 1, 3).unwrap());
    }

    #[test]
    fn resolve_local_handles_fixed_offsets() {
        let at = resolve_local(&hours(8), local(2026, 5, 1, 8, 0));
        assert_eq!(at, Utc.with_ymd_and_hms(2026, 5, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn clock_is_object_safe() {
        fn _assert(_: &dyn Clock) {}
    }
}
