use chrono::NaiveDate;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttendanceSummary {
    pub present_count: i64,
    pub absent_count: i64,
    pub recorded_count: i64,
}

/// Counts over exactly the marks handed in. The ledger does not
/// backfill days with no submission, so these totals mean "of the
/// recorded entries", not "of the calendar".
pub fn summarize<I>(marks: I) -> AttendanceSummary
where
    I: IntoIterator<Item = bool>,
{
    let mut present: i64 = 0;
    let mut total: i64 = 0;
    for is_present in marks {
        total += 1;
        if is_present {
            present += 1;
        }
    }
    AttendanceSummary {
        present_count: present,
        absent_count: total - present,
        recorded_count: total,
    }
}

pub fn parse_iso_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok()
}

/// Month keys are strict `YYYY-MM`.
pub fn parse_month_key(month: &str) -> Option<(i32, u32)> {
    let t = month.trim();
    let (y, m) = t.split_once('-')?;
    if y.len() != 4 || m.len() != 2 {
        return None;
    }
    let year = y.parse::<i32>().ok()?;
    let month_num = m.parse::<u32>().ok()?;
    if !(1..=12).contains(&month_num) {
        return None;
    }
    Some((year, month_num))
}

/// Half-open `[first day, first day of next month)` window as stored
/// date strings, so a month query is a plain range predicate.
pub fn month_bounds(year: i32, month: u32) -> Option<(String, String)> {
    let start = NaiveDate::from_ymd_opt(year, month, 1)?;
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    let end = NaiveDate::from_ymd_opt(next_year, next_month, 1)?;
    Some((
        start.format("%Y-%m-%d").to_string(),
        end.format("%Y-%m-%d").to_string(),
    ))
}
