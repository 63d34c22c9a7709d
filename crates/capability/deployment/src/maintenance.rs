//! 维护窗口计算。
//!
//! 周期表达式为带秒字段的 cron（`秒 分 时 日 月 周 [年]`）：
//! 前六个字段交给 croner 计算，可选的年份字段（`*`、单个年份、`a-b`、逗号列表）在本地过滤，
//! 因此一次性的窗口可以“过期”。`?` 视同 `*`；周字段使用 cron 编号（0/7 为周日，也可写 MON-FRI）。
//!
//! 时长为 `HH:mm:ss`，时区为固定偏移 `±HH:mm` 或 `Z`。

use std::fmt;

use chrono::{DateTime, Datelike, FixedOffset, TimeDelta, TimeZone, Utc};
use croner::Cron;
use fota_storage::MaintenanceWindowSpec;

/// 年份字段允许的范围。
const MIN_YEAR: i32 = 1970;
const MAX_YEAR: i32 = 2099;
/// 年份过滤时最多跳跃的次数。
const MAX_YEAR_JUMPS: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MaintenanceError {
    #[error("maintenance schedule, duration and timezone must all be set")]
    Incomplete,
    #[error("invalid maintenance schedule {expression}: {reason}")]
    InvalidSchedule { expression: String, reason: String },
    #[error("invalid maintenance duration {0}, expected HH:mm:ss")]
    InvalidDuration(String),
    #[error("invalid maintenance timezone {0}, expected ±HH:mm")]
    InvalidTimezone(String),
    #[error("maintenance schedule {0} has no upcoming window")]
    Lapsed(String),
}

/// 一个维护窗口 `[start, end)`。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaintenanceWindow {
    pub start: DateTime<FixedOffset>,
    pub end: DateTime<FixedOffset>,
}

impl MaintenanceWindow {
    pub fn contains(&self, now: DateTime<Utc>) -> bool {
        self.start.with_timezone(&Utc) <= now && now < self.end.with_timezone(&Utc)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum YearFilter {
    Any,
    /// 升序的闭区间列表
    Ranges(Vec<(i32, i32)>),
}

impl YearFilter {
    fn parse(field: &str) -> Result<Self, String> {
        if field == "*" || field == "?" {
            return Ok(YearFilter::Any);
        }
        let mut ranges = Vec::new();
        for part in field.split(',') {
            let (from, to) = match part.split_once('-') {
                Some((from, to)) => (parse_year(from)?, parse_year(to)?),
                None => {
                    let year = parse_year(part)?;
                    (year, year)
                }
            };
            if from > to {
                return Err(format!("year range {} is reversed", part));
            }
            ranges.push((from, to));
        }
        ranges.sort_unstable();
        Ok(YearFilter::Ranges(ranges))
    }

    fn matches(&self, year: i32) -> bool {
        match self {
            YearFilter::Any => true,
            YearFilter::Ranges(ranges) => ranges.iter().any(|(from, to)| *from <= year && year <= *to),
        }
    }

    /// 不早于 `year` 的第一个允许年份。
    fn next_allowed(&self, year: i32) -> Option<i32> {
        match self {
            YearFilter::Any => Some(year),
            YearFilter::Ranges(ranges) => ranges
                .iter()
                .find(|(_, to)| year <= *to)
                .map(|(from, _)| (*from).max(year)),
        }
    }
}

fn parse_year(value: &str) -> Result<i32, String> {
    let year = parse_digits(value).ok_or_else(|| format!("invalid year {}", value))?;
    let year = i32::try_from(year).map_err(|_| format!("invalid year {}", value))?;
    if !(MIN_YEAR..=MAX_YEAR).contains(&year) {
        return Err(format!("year {} out of range {}-{}", year, MIN_YEAR, MAX_YEAR));
    }
    Ok(year)
}

fn parse_digits(value: &str) -> Option<u64> {
    if value.is_empty() || !value.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    value.parse().ok()
}

/// 解析后的维护窗口定义。
pub struct MaintenanceSchedule {
    expression: String,
    cron: Cron,
    years: YearFilter,
    duration: TimeDelta,
    offset: FixedOffset,
}

impl fmt::Debug for MaintenanceSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MaintenanceSchedule")
            .field("expression", &self.expression)
            .field("duration", &self.duration)
            .field("offset", &self.offset)
            .finish()
    }
}

impl MaintenanceSchedule {
    pub fn parse(schedule: &str, duration: &str, timezone: &str) -> Result<Self, MaintenanceError> {
        if schedule.trim().is_empty() || duration.trim().is_empty() || timezone.trim().is_empty() {
            return Err(MaintenanceError::Incomplete);
        }
        let invalid = |reason: String| MaintenanceError::InvalidSchedule {
            expression: schedule.to_string(),
            reason,
        };
        let fields: Vec<&str> = schedule.split_whitespace().collect();
        let (cron_fields, years) = match fields.len() {
            6 => (&fields[..], YearFilter::Any),
            7 => (&fields[..6], YearFilter::parse(fields[6]).map_err(invalid)?),
            count => {
                return Err(invalid(format!("expected 6 or 7 fields, found {}", count)));
            }
        };
        let pattern = cron_fields
            .iter()
            .map(|field| if *field == "?" { "*" } else { *field })
            .collect::<Vec<_>>()
            .join(" ");
        let cron = Cron::new(&pattern)
            .with_seconds_required()
            .parse()
            .map_err(|err| invalid(err.to_string()))?;

        Ok(Self {
            expression: schedule.to_string(),
            cron,
            years,
            duration: parse_duration(duration)?,
            offset: parse_offset(timezone)?,
        })
    }

    pub fn from_spec(spec: &MaintenanceWindowSpec) -> Result<Self, MaintenanceError> {
        Self::parse(&spec.schedule, &spec.duration, &spec.timezone)
    }

    pub fn duration(&self) -> TimeDelta {
        self.duration
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    /// 不早于 `now` 的下一次窗口开始时间；表达式不会再触发时返回 None。
    pub fn next_window_start(&self, now: DateTime<Utc>) -> Option<DateTime<FixedOffset>> {
        self.occurrence_from(now.with_timezone(&self.offset), true)
    }

    pub fn window_end(&self, start: DateTime<FixedOffset>) -> DateTime<FixedOffset> {
        start + self.duration
    }

    /// 包含 `now` 的窗口（开始时间落在 `(now - duration, now]`），否则下一个窗口。
    pub fn current_or_next_window(&self, now: DateTime<Utc>) -> Option<MaintenanceWindow> {
        let from = now.with_timezone(&self.offset) - self.duration;
        let start = self.occurrence_from(from, false)?;
        Some(MaintenanceWindow {
            start,
            end: self.window_end(start),
        })
    }

    pub fn is_available(&self, now: DateTime<Utc>) -> bool {
        self.current_or_next_window(now)
            .is_some_and(|window| window.contains(now))
    }

    pub fn is_lapsed(&self, now: DateTime<Utc>) -> bool {
        self.current_or_next_window(now).is_none()
    }

    fn occurrence_from(
        &self,
        from: DateTime<FixedOffset>,
        inclusive: bool,
    ) -> Option<DateTime<FixedOffset>> {
        let mut cursor = from;
        let mut inclusive = inclusive;
        for _ in 0..MAX_YEAR_JUMPS {
            let next = self.cron.find_next_occurrence(&cursor, inclusive).ok()?;
            if self.years.matches(next.year()) {
                return Some(next);
            }
            let year = self.years.next_allowed(next.year())?;
            cursor = self.offset.with_ymd_and_hms(year, 1, 1, 0, 0, 0).single()?;
            inclusive = true;
        }
        None
    }
}

/// 校验窗口定义可解析且尚未过期。
pub fn validate_window(
    spec: &MaintenanceWindowSpec,
    now: DateTime<Utc>,
) -> Result<MaintenanceSchedule, MaintenanceError> {
    let schedule = MaintenanceSchedule::from_spec(spec)?;
    if schedule.is_lapsed(now) {
        return Err(MaintenanceError::Lapsed(spec.schedule.clone()));
    }
    Ok(schedule)
}

/// 无窗口定义时不受限制。
pub fn is_window_available(
    spec: Option<&MaintenanceWindowSpec>,
    now: DateTime<Utc>,
) -> Result<bool, MaintenanceError> {
    match spec {
        None => Ok(true),
        Some(spec) => Ok(MaintenanceSchedule::from_spec(spec)?.is_available(now)),
    }
}

fn parse_duration(value: &str) -> Result<TimeDelta, MaintenanceError> {
    let invalid = || MaintenanceError::InvalidDuration(value.to_string());
    let parts: Vec<&str> = value.trim().split(':').collect();
    let [hours, minutes, seconds] = parts.as_slice() else {
        return Err(invalid());
    };
    let hours = parse_digits(hours).filter(|h| *h < 100_000).ok_or_else(invalid)?;
    let minutes = parse_digits(minutes).filter(|m| *m < 60).ok_or_else(invalid)?;
    let seconds = parse_digits(seconds).filter(|s| *s < 60).ok_or_else(invalid)?;
    let total = hours * 3600 + minutes * 60 + seconds;
    if total == 0 {
        return Err(invalid());
    }
    TimeDelta::try_seconds(total as i64).ok_or_else(invalid)
}

fn parse_offset(value: &str) -> Result<FixedOffset, MaintenanceError> {
    let invalid = || MaintenanceError::InvalidTimezone(value.to_string());
    let value = value.trim();
    if value == "Z" {
        return FixedOffset::east_opt(0).ok_or_else(invalid);
    }
    let sign = match value.chars().next() {
        Some('+') => 1,
        Some('-') => -1,
        _ => return Err(invalid()),
    };
    let (hours, minutes) = value[1..].split_once(':').ok_or_else(invalid)?;
    let hours = parse_digits(hours).filter(|h| *h <= 18).ok_or_else(invalid)?;
    let minutes = parse_digits(minutes).filter(|m| *m < 60).ok_or_else(invalid)?;
    let seconds = sign * (hours * 3600 + minutes * 60) as i32;
    FixedOffset::east_opt(seconds).ok_or_else(invalid)
}
