use chrono::NaiveDate;

use crate::model::UnitId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CalendarError {
    InvalidRange {
        start: NaiveDate,
        end: NaiveDate,
    },
    MonthNotFound {
        unit_id: UnitId,
        year: i32,
        month: u32,
    },
    DuplicateMonth {
        unit_id: UnitId,
        year: i32,
        month: u32,
    },
    InvalidDayRange {
        year: i32,
        month: u32,
        first_day: u32,
        last_day: u32,
    },
    UnitNotFound(UnitId),
    Storage(String),
}

impl std::fmt::Display for CalendarError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CalendarError::InvalidRange { start, end } => {
                write!(f, "invalid range: end {end} is before start {start}")
            }
            CalendarError::MonthNotFound { unit_id, year, month } => {
                write!(f, "month {year}-{month:02} not found for unit {unit_id}")
            }
            CalendarError::DuplicateMonth { unit_id, year, month } => {
                write!(f, "month {year}-{month:02} already exists for unit {unit_id}")
            }
            CalendarError::InvalidDayRange {
                year,
                month,
                first_day,
                last_day,
            } => write!(
                f,
                "day range {first_day}..={last_day} outside {year}-{month:02}"
            ),
            CalendarError::UnitNotFound(id) => write!(f, "unit not found: {id}"),
            CalendarError::Storage(e) => write!(f, "storage error: {e}"),
        }
    }
}

impl std::error::Error for CalendarError {}
