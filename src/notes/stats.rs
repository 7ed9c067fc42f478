use chrono::{Datelike, Months, NaiveDate, NaiveDateTime};
use diesel::dsl::max;
use diesel::prelude::*;
use diesel::PgConnection;

use crate::models::NoteType;
use crate::schema::{notes, people};

const SECONDS_PER_DAY: f64 = 86_400.0;

pub fn count_active_people(conn: &mut PgConnection, company_id: i64) -> QueryResult<i64> {
    people::table
        .filter(people::company_id.eq(company_id))
        .filter(people::is_active.eq(true))
        .count()
        .get_result(conn)
}

/// Live 1:1 notes of active people created during the calendar month that
/// contains `now`.
pub fn one_on_ones_this_month(
    conn: &mut PgConnection,
    company_id: i64,
    now: NaiveDateTime,
) -> QueryResult<i64> {
    let (start, end) = month_bounds(now);
    notes::table
        .inner_join(people::table)
        .filter(people::company_id.eq(company_id))
        .filter(people::is_active.eq(true))
        .filter(notes::note_type.eq(NoteType::OneOnOne.as_str()))
        .filter(notes::deleted_at.is_null())
        .filter(notes::created_at.ge(start))
        .filter(notes::created_at.lt(end))
        .count()
        .get_result(conn)
}

pub fn average_frequency_days(conn: &mut PgConnection, company_id: i64) -> QueryResult<f64> {
    let meetings: Vec<(i64, NaiveDateTime)> = notes::table
        .inner_join(people::table)
        .filter(people::company_id.eq(company_id))
        .filter(people::is_active.eq(true))
        .filter(notes::note_type.eq(NoteType::OneOnOne.as_str()))
        .filter(notes::deleted_at.is_null())
        .select((notes::person_id, notes::created_at))
        .order((notes::person_id.asc(), notes::created_at.asc()))
        .load(conn)?;

    Ok(average_cadence_days(&meetings))
}

pub fn last_meeting_date(
    conn: &mut PgConnection,
    company_id: i64,
) -> QueryResult<Option<NaiveDateTime>> {
    notes::table
        .inner_join(people::table)
        .filter(people::company_id.eq(company_id))
        .filter(people::is_active.eq(true))
        .filter(notes::note_type.eq(NoteType::OneOnOne.as_str()))
        .filter(notes::deleted_at.is_null())
        .select(max(notes::created_at))
        .first(conn)
}

/// Mean gap in days between consecutive 1:1s of the same person, averaged
/// over every such pair. Input must be sorted by person, then timestamp.
pub fn average_cadence_days(meetings: &[(i64, NaiveDateTime)]) -> f64 {
    let gaps: Vec<f64> = meetings
        .windows(2)
        .filter(|pair| pair[0].0 == pair[1].0)
        .map(|pair| (pair[1].1 - pair[0].1).num_seconds() as f64 / SECONDS_PER_DAY)
        .collect();

    if gaps.is_empty() {
        return 0.0;
    }
    gaps.iter().sum::<f64>() / gaps.len() as f64
}

/// Start of the month containing `now` and start of the following month.
pub fn month_bounds(now: NaiveDateTime) -> (NaiveDateTime, NaiveDateTime) {
    let first_day = NaiveDate::from_ymd_opt(now.year(), now.month(), 1)
        .unwrap_or(now.date())
        .and_time(chrono::NaiveTime::MIN);
    let next = first_day
        .checked_add_months(Months::new(1))
        .unwrap_or(NaiveDateTime::MAX);
    (first_day, next)
}
