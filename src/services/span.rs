use crate::models::grid::HOURS_PER_DAY;

/// Longest duration or buffer a service may declare: one full grid day.
pub const MAX_SERVICE_MINUTES: i64 = HOURS_PER_DAY as i64 * 60;

/// Number of contiguous hourly cells a service occupies, buffers included.
/// Always at least one cell; negative inputs count as zero. The sum
/// saturates, so absurd inputs yield a span no grid day can fit.
pub fn required_span(
    duration_minutes: i64,
    buffer_before_minutes: i64,
    buffer_after_minutes: i64,
) -> i64 {
    let total = duration_minutes
        .max(0)
        .saturating_add(buffer_before_minutes.max(0))
        .saturating_add(buffer_after_minutes.max(0));
    if total <= 0 {
        return 1;
    }
    total / 60 + i64::from(total % 60 != 0)
}
