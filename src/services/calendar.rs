use chrono::{Duration, NaiveTime};

use crate::models::Reservation;

const ICS_FORMAT: &str = "%Y%m%dT%H%M%S";

/// Single-event iCalendar file covering the reservation's hour cells.
pub fn generate_ics(reservation: &Reservation, provider_name: &str) -> String {
    let date = reservation.day.date_in_week(reservation.week_of);
    let start_hour = reservation.start_hour.clamp(0, 23) as u32;
    let start = date.and_time(NaiveTime::from_hms_opt(start_hour, 0, 0).unwrap_or(NaiveTime::MIN));
    let end = start + Duration::hours(reservation.span.max(1));

    let dtstart = start.format(ICS_FORMAT).to_string();
    let dtend = end.format(ICS_FORMAT).to_string();
    let dtstamp = reservation.updated_at.format(ICS_FORMAT).to_string();
    let uid = format!("{}@cleanbook", reservation.id);

    let summary = match reservation.service_name.as_deref() {
        Some(service) => format!("{service} with {provider_name}"),
        None => format!("Cleaning with {provider_name}"),
    };

    format!(
        "BEGIN:VCALENDAR\r\n\
         VERSION:2.0\r\n\
         PRODID:-//Cleanbook//Reservations//EN\r\n\
         BEGIN:VEVENT\r\n\
         UID:{uid}\r\n\
         DTSTAMP:{dtstamp}\r\n\
         DTSTART:{dtstart}\r\n\
         DTEND:{dtend}\r\n\
         SUMMARY:{summary}\r\n\
         STATUS:CONFIRMED\r\n\
         END:VEVENT\r\n\
         END:VCALENDAR\r\n"
    )
}
