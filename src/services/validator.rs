use crate::errors::AppError;
use crate::models::grid::{covered_hours, Cell, Day, FIRST_HOUR, LAST_HOUR};

use super::composer::ComposedView;

/// First hour in the requested run that is not free, with its cell.
#[derive(Debug, Clone, PartialEq)]
pub struct Obstruction {
    pub hour: u8,
    pub cell: Cell,
}

impl Obstruction {
    /// Taken by another reservation rather than closed by the provider.
    pub fn is_taken(&self) -> bool {
        matches!(self.cell, Cell::Pending { .. } | Cell::Booked { .. })
    }
}

fn check_range(start_hour: i64, span: i64) -> Result<std::ops::RangeInclusive<u8>, AppError> {
    if span < 1 {
        return Err(AppError::Validation(format!("span must be at least 1, got {span}")));
    }
    covered_hours(start_hour, span).ok_or_else(|| {
        AppError::Validation(format!(
            "{span} hour(s) from {start_hour}:00 does not fit between \
             {FIRST_HOUR}:00 and {LAST_HOUR}:00"
        ))
    })
}

pub fn first_obstruction(
    view: &ComposedView,
    day: Day,
    start_hour: i64,
    span: i64,
) -> Result<Option<Obstruction>, AppError> {
    for hour in check_range(start_hour, span)? {
        let cell = view.cell(day, hour).cloned().unwrap_or(Cell::Blocked);
        if !cell.is_free() {
            return Ok(Some(Obstruction { hour, cell }));
        }
    }
    Ok(None)
}

/// True only when every hour of the run is free in the composed view.
/// Out-of-grid runs and spans below one are validation errors.
pub fn can_reserve(
    view: &ComposedView,
    day: Day,
    start_hour: i64,
    span: i64,
) -> Result<bool, AppError> {
    Ok(first_obstruction(view, day, start_hour, span)?.is_none())
}

/// Server-side gate used right before the storage claim.
pub fn ensure_reservable(
    view: &ComposedView,
    day: Day,
    start_hour: i64,
    span: i64,
) -> Result<(), AppError> {
    match first_obstruction(view, day, start_hour, span)? {
        None => Ok(()),
        Some(obstruction) if obstruction.is_taken() => Err(AppError::Conflict(format!(
            "this slot was just taken ({} {}:00), please pick another",
            day.as_str(),
            obstruction.hour
        ))),
        Some(obstruction) => Err(AppError::Validation(format!(
            "provider is not available on {} at {}:00",
            day.as_str(),
            obstruction.hour
        ))),
    }
}
