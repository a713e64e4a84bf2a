//! Party availability schedules
//!
//! A schedule is a set of recurring availability windows. Windows are
//! compared on a minute-of-day grid; a window whose end is not after its
//! start runs past midnight and spills into the following weekday.

pub mod matcher;

pub use matcher::{Candidate, PartyScheduleMatcher};

use crate::error::{MatchmakingError, Result};
use chrono::{NaiveTime, Timelike, Weekday};
use serde::{Deserialize, Serialize};

const MINUTES_PER_DAY: u32 = 24 * 60;

/// Map a weekday number to a weekday. Both 0 and 7 mean Sunday.
pub fn weekday_from_number(n: u32) -> Option<Weekday> {
    match n {
        0 | 7 => Some(Weekday::Sun),
        1 => Some(Weekday::Mon),
        2 => Some(Weekday::Tue),
        3 => Some(Weekday::Wed),
        4 => Some(Weekday::Thu),
        5 => Some(Weekday::Fri),
        6 => Some(Weekday::Sat),
        _ => None,
    }
}

/// A single recurring availability option
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    /// `None` matches any weekday
    pub weekday: Option<Weekday>,
    /// `None` matches any day of the month
    pub day_of_month: Option<u32>,
    pub start: NaiveTime,
    pub end: NaiveTime,
}

/// Minute-of-day interval on a single calendar day, half-open
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Segment {
    weekday: Option<Weekday>,
    day_of_month: Option<u32>,
    start: u32,
    end: u32,
}

impl Segment {
    fn overlaps(&self, other: &Segment) -> bool {
        days_compatible(self.weekday, other.weekday)
            && days_compatible(self.day_of_month, other.day_of_month)
            && self.start < other.end
            && other.start < self.end
    }

    fn intersect(&self, other: &Segment) -> Option<TimeWindow> {
        if !self.overlaps(other) {
            return None;
        }
        Some(TimeWindow {
            weekday: self.weekday.or(other.weekday),
            day_of_month: self.day_of_month.or(other.day_of_month),
            start: time_from_minutes(self.start.max(other.start)),
            end: time_from_minutes(self.end.min(other.end)),
        })
    }
}

fn days_compatible<T: PartialEq>(a: Option<T>, b: Option<T>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => a == b,
        _ => true,
    }
}

fn minutes_of(time: NaiveTime) -> u32 {
    time.hour() * 60 + time.minute()
}

// 1440 renders as midnight, which reads back as "runs until end of day".
fn time_from_minutes(minutes: u32) -> NaiveTime {
    let minutes = minutes % MINUTES_PER_DAY;
    NaiveTime::from_hms_opt(minutes / 60, minutes % 60, 0).unwrap_or(NaiveTime::MIN)
}

fn next_day_of_month(day: u32) -> u32 {
    if day >= 31 {
        1
    } else {
        day + 1
    }
}

impl TimeWindow {
    pub fn new(weekday: Option<Weekday>, start: NaiveTime, end: NaiveTime) -> Self {
        Self {
            weekday,
            day_of_month: None,
            start,
            end,
        }
    }

    /// Window on a weekday given as `(hour, minute)` bounds
    pub fn weekly(weekday: Weekday, start: (u32, u32), end: (u32, u32)) -> Result<Self> {
        let start = NaiveTime::from_hms_opt(start.0, start.1, 0).ok_or_else(|| {
            MatchmakingError::InvalidCriteria {
                reason: format!("invalid window start {:02}:{:02}", start.0, start.1),
            }
        })?;
        let end = NaiveTime::from_hms_opt(end.0, end.1, 0).ok_or_else(|| {
            MatchmakingError::InvalidCriteria {
                reason: format!("invalid window end {:02}:{:02}", end.0, end.1),
            }
        })?;
        Ok(Self::new(Some(weekday), start, end))
    }

    pub fn with_day_of_month(mut self, day: u32) -> Self {
        self.day_of_month = Some(day);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(day) = self.day_of_month {
            if !(1..=31).contains(&day) {
                return Err(MatchmakingError::InvalidCriteria {
                    reason: format!("day of month {} is out of range", day),
                }
                .into());
            }
        }
        Ok(())
    }

    pub fn crosses_midnight(&self) -> bool {
        self.end <= self.start
    }

    fn segments(&self) -> Vec<Segment> {
        let start = minutes_of(self.start);
        let end = minutes_of(self.end);
        if !self.crosses_midnight() {
            return vec![Segment {
                weekday: self.weekday,
                day_of_month: self.day_of_month,
                start,
                end,
            }];
        }

        let mut segments = vec![Segment {
            weekday: self.weekday,
            day_of_month: self.day_of_month,
            start,
            end: MINUTES_PER_DAY,
        }];
        if end > 0 {
            segments.push(Segment {
                weekday: self.weekday.map(|d| d.succ()),
                day_of_month: self.day_of_month.map(next_day_of_month),
                start: 0,
                end,
            });
        }
        segments
    }

    pub fn overlaps(&self, other: &TimeWindow) -> bool {
        let theirs = other.segments();
        self.segments()
            .iter()
            .any(|a| theirs.iter().any(|b| a.overlaps(b)))
    }

    fn intersect(&self, other: &TimeWindow) -> Vec<TimeWindow> {
        let theirs = other.segments();
        self.segments()
            .iter()
            .flat_map(|a| theirs.iter().filter_map(move |b| a.intersect(b)))
            .collect()
    }
}

impl std::fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.weekday {
            Some(day) => write!(f, "{}", day)?,
            None => write!(f, "any day")?,
        }
        if let Some(dom) = self.day_of_month {
            write!(f, " (day {})", dom)?;
        }
        write!(
            f,
            " {}-{}",
            self.start.format("%H:%M"),
            self.end.format("%H:%M")
        )
    }
}

/// A party's declared availability
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    pub windows: Vec<TimeWindow>,
}

impl Schedule {
    pub fn new(windows: Vec<TimeWindow>) -> Self {
        Self { windows }
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    /// Two schedules are compatible when any pair of their windows overlaps
    pub fn is_compatible_with(&self, other: &Schedule) -> bool {
        self.windows
            .iter()
            .any(|a| other.windows.iter().any(|b| a.overlaps(b)))
    }

    /// Availability shared by both schedules
    pub fn intersect(&self, other: &Schedule) -> Schedule {
        let mut windows: Vec<TimeWindow> = Vec::new();
        for a in &self.windows {
            for b in &other.windows {
                for window in a.intersect(b) {
                    if !windows.contains(&window) {
                        windows.push(window);
                    }
                }
            }
        }
        Schedule { windows }
    }

    /// Shared availability of a group. `None` when the group has no
    /// schedules, when any two members are incompatible, or when the
    /// members share no common window.
    pub fn collective<'a, I>(schedules: I) -> Option<Schedule>
    where
        I: IntoIterator<Item = &'a Schedule>,
    {
        let schedules: Vec<&Schedule> = schedules.into_iter().collect();
        let (first, rest) = schedules.split_first()?;

        for (i, a) in schedules.iter().enumerate() {
            for b in &schedules[i + 1..] {
                if !a.is_compatible_with(b) {
                    return None;
                }
            }
        }

        let shared = rest
            .iter()
            .fold((*first).clone(), |acc, next| acc.intersect(next));
        if shared.is_empty() {
            None
        } else {
            Some(shared)
        }
    }
}

impl std::fmt::Display for Schedule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let rendered: Vec<String> = self.windows.iter().map(|w| w.to_string()).collect();
        write!(f, "[{}]", rendered.join(", "))
    }
}
