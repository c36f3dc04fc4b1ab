use crate::date::{add_days, format_timestamp, is_monday, is_sunday, last_sunday_before};
use crate::doc_type::DocType;
use crate::error::Error;
use chrono::NaiveDate;
use std::fmt;
use std::ops::Deref;

/// Maximum number of days a single sync fetches for one document type.
pub const MAX_LOOKBACK: usize = 30;

const BACKFILL_WINDOW_START_DAYS: i64 = 35;
const BACKFILL_WINDOW_END_DAYS: i64 = 15;
const WEEKS_FOR_BUFFER: u32 = 2;
const SETTLE_DAYS: i64 = 3;

/// Ascending, gap-free sequence of dates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TimestampRange(Vec<NaiveDate>);

impl TimestampRange {
    /// All dates from `start` to `end`, both inclusive. Empty when `start > end`.
    pub fn inclusive(start: NaiveDate, end: NaiveDate) -> Self {
        if start > end {
            return Self::default();
        }
        Self(start.iter_days().take_while(|date| *date <= end).collect())
    }

    pub fn timestamps(&self) -> Vec<String> {
        self.0.iter().copied().map(format_timestamp).collect()
    }

    fn keep_last(mut self, n: usize) -> Self {
        if self.0.len() > n {
            self.0.drain(..self.0.len() - n);
        }
        self
    }
}

impl Deref for TimestampRange {
    type Target = [NaiveDate];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Where a range starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStart {
    /// Day after the last successful sync.
    After(NaiveDate),
    /// Exactly this date, e.g. an explicit start or a never-synced document type.
    From(NaiveDate),
}

impl SyncStart {
    fn first_date(&self) -> NaiveDate {
        match self {
            SyncStart::After(last_synced) => add_days(*last_synced, 1),
            SyncStart::From(date) => *date,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Truncation {
    pub doc_type: DocType,
    pub requested_days: usize,
    pub kept_days: usize,
}

impl fmt::Display for Truncation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "range of {} days for {} exceeds max lookback, keeping the most recent {}",
            self.requested_days, self.doc_type, self.kept_days
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangePlan {
    pub range: TimestampRange,
    pub truncation: Option<Truncation>,
}

impl RangePlan {
    #[cfg(test)]
    pub fn is_truncated(&self) -> bool {
        self.truncation.is_some()
    }
}

/// Computes the dates to fetch for `doc_type`.
///
/// # Arguments
/// * `doc_type` - Document type the range is planned for, used in the truncation report
/// * `start` - Where the range starts
/// * `explicit_end` - Last date to fetch, defaults to the day before `today`
/// * `today` - Current date in the configured timezone
///
/// # Returns
/// A [`RangePlan`] holding at most [`MAX_LOOKBACK`] dates. Longer ranges keep the most
/// recent dates and carry a [`Truncation`]. A start after the end yields an empty range.
pub fn compute_timestamp_range(
    doc_type: DocType,
    start: SyncStart,
    explicit_end: Option<NaiveDate>,
    today: NaiveDate,
) -> RangePlan {
    let end = explicit_end.unwrap_or_else(|| add_days(today, -1));
    let range = TimestampRange::inclusive(start.first_date(), end);

    if range.len() <= MAX_LOOKBACK {
        return RangePlan {
            range,
            truncation: None,
        };
    }

    let truncation = Truncation {
        doc_type,
        requested_days: range.len(),
        kept_days: MAX_LOOKBACK,
    };

    RangePlan {
        range: range.keep_last(MAX_LOOKBACK),
        truncation: Some(truncation),
    }
}

/// Rejects a custom `--start-timestamp` range that is inverted or longer than the lookback.
/// Without a custom start every document type plans from its own sync state and long
/// ranges are truncated instead, so an end date alone is never rejected.
pub fn validate_custom_range(
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
    today: NaiveDate,
) -> Result<(), Error> {
    let Some(start) = start else {
        return Ok(());
    };

    let end = end.unwrap_or_else(|| add_days(today, -1));
    if start > end {
        return Err(Error::StartDateAfterEndDate {
            start_date: format_timestamp(start),
            end_date: format_timestamp(end),
        });
    }

    let days = TimestampRange::inclusive(start, end).len();
    if days > MAX_LOOKBACK {
        return Err(Error::CustomRangeExceedsLookback {
            days,
            max_lookback: MAX_LOOKBACK,
        });
    }
    Ok(())
}

/// Kind of sync run. Each kind backfills member company insights over its own window
/// and keeps its own backfill progress in the data service.
#[derive(clap::ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum JobType {
    /// Regular daily sync, backfilling the trailing window.
    Daily,
    /// Backfills the two full weeks before the last Sunday.
    Weekly,
    /// Backfills the two full weeks ending two weeks before the last Sunday.
    WeeklyBuffered,
}

impl JobType {
    pub const ALL: [JobType; 3] = [JobType::Daily, JobType::Weekly, JobType::WeeklyBuffered];

    /// `sync_type` the data service stores this job's backfill progress under.
    pub fn sync_type(&self) -> u8 {
        match self {
            JobType::Daily => 1,
            JobType::Weekly => 2,
            JobType::WeeklyBuffered => 3,
        }
    }

    pub fn from_sync_type(sync_type: u8) -> Option<JobType> {
        JobType::ALL
            .into_iter()
            .find(|job| job.sync_type() == sync_type)
    }

    pub fn backfill_window(&self, today: NaiveDate) -> BackfillWindow {
        match self {
            JobType::Daily => BackfillWindow::trailing(today),
            JobType::Weekly => BackfillWindow::weekly(today, 0),
            JobType::WeeklyBuffered => BackfillWindow::weekly(today, WEEKS_FOR_BUFFER),
        }
    }

    /// The weekly job leaves out the last week until its data has settled, i.e. while
    /// the date three days ago still falls inside it.
    pub fn unsettled_date(&self, today: NaiveDate) -> Option<NaiveDate> {
        match self {
            JobType::Weekly => Some(add_days(today, -SETTLE_DAYS)),
            _ => None,
        }
    }
}

/// Historical window eligible for backfilling, both ends inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackfillWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl BackfillWindow {
    /// `[today - 35, today - 15]`.
    pub fn trailing(today: NaiveDate) -> Self {
        Self {
            start: add_days(today, -BACKFILL_WINDOW_START_DAYS),
            end: add_days(today, -BACKFILL_WINDOW_END_DAYS),
        }
    }

    /// Two full Monday to Sunday weeks ending on the last Sunday before `today`,
    /// pushed back by `weeks_for_buffer` weeks.
    pub fn weekly(today: NaiveDate, weeks_for_buffer: u32) -> Self {
        let end = add_days(last_sunday_before(today), -7 * weeks_for_buffer as i64);
        Self {
            start: add_days(end, -13),
            end,
        }
    }

    pub fn explicit(start: NaiveDate, end: NaiveDate) -> Result<Self, Error> {
        if !is_monday(start) {
            return Err(Error::InvalidBackfillBoundary {
                date: format_timestamp(start),
                expected: "Monday",
            });
        }
        if !is_sunday(end) {
            return Err(Error::InvalidBackfillBoundary {
                date: format_timestamp(end),
                expected: "Sunday",
            });
        }
        if start > end {
            return Err(Error::StartDateAfterEndDate {
                start_date: format_timestamp(start),
                end_date: format_timestamp(end),
            });
        }
        Ok(Self { start, end })
    }
}

/// Splits the part of `window` not yet backfilled into week chunks.
///
/// Every chunk closes on a Sunday, so the first one may be shorter than a week. When the
/// window does not end on a Sunday the last chunk ends on the window end instead.
///
/// # Arguments
/// * `last_backfill` - Last date already backfilled, `None` if never
/// * `window` - Dates eligible for backfilling
///
/// # Returns
/// Chunks in chronological order, each at most seven days long
pub fn compute_backfill_chunks(
    last_backfill: Option<NaiveDate>,
    window: &BackfillWindow,
) -> Vec<TimestampRange> {
    let start = match last_backfill {
        Some(last) => add_days(last, 1).max(window.start),
        None => window.start,
    };

    let mut chunks = Vec::new();
    let mut current = Vec::with_capacity(7);

    for date in TimestampRange::inclusive(start, window.end).iter() {
        current.push(*date);
        if is_sunday(*date) {
            chunks.push(TimestampRange(std::mem::take(&mut current)));
        }
    }
    if !current.is_empty() {
        chunks.push(TimestampRange(current));
    }

    chunks
}

/// Drops every chunk containing `date`.
pub fn exclude_chunks_containing(
    chunks: Vec<TimestampRange>,
    date: NaiveDate,
) -> Vec<TimestampRange> {
    chunks
        .into_iter()
        .filter(|chunk| !chunk.contains(&date))
        .collect()
}
