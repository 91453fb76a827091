//! Start-instant arithmetic in the requester's timezone

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;
use leavesync_domain::LeaveRequest;

/// Instant at which the synchronization becomes due: the workday start on
/// the request's first day, in the requester's timezone.
pub fn effective_start(request: &LeaveRequest) -> Result<DateTime<Utc>, String> {
    local_instant(
        &request.requester_timezone,
        request.start_date,
        request.schedule.workday_start_hour,
        0,
        0,
    )
}

/// Interval the external entry covers: workday start on the first day to
/// end of day on the last day, both in the requester's timezone.
pub fn entry_window(request: &LeaveRequest) -> Result<(DateTime<Utc>, DateTime<Utc>), String> {
    let start = effective_start(request)?;
    let end = local_instant(&request.requester_timezone, request.end_date, 23, 59, 59)?;
    if end < start {
        return Err(format!(
            "request {} ends before it starts ({} > {})",
            request.id, request.start_date, request.end_date
        ));
    }
    Ok((start, end))
}

fn local_instant(
    timezone: &str,
    date: NaiveDate,
    hour: u32,
    minute: u32,
    second: u32,
) -> Result<DateTime<Utc>, String> {
    let tz: Tz = timezone.parse().map_err(|_| format!("unknown timezone '{timezone}'"))?;
    let naive = date
        .and_hms_opt(hour, minute, second)
        .ok_or_else(|| format!("invalid time {hour}:{minute}:{second}"))?;
    // DST gaps: take the earliest valid interpretation.
    tz.from_local_datetime(&naive)
        .earliest()
        .map(|local| local.with_timezone(&Utc))
        .ok_or_else(|| format!("unrepresentable local time {naive} in {timezone}"))
}
