//! Per-call metering, conversation retention and the usage report.

use std::str::FromStr;

use chrono::{DateTime, Duration, Months, NaiveDateTime, Utc};
use diesel::dsl::{count_star, sum};
use diesel::prelude::*;
use diesel::PgConnection;
use serde::Serialize;
use uuid::Uuid;

use super::Usage;
use crate::error::{AppError, AppResult};
use crate::models::{
    AiUsageTracker, FeedbackVerdict, NewAiConversation, NewAiUsageTracker, RequestType,
};
use crate::schema::{ai_conversations, ai_usage_trackers};

#[derive(Debug, Clone)]
pub struct UsageRecord {
    pub uuid: Uuid,
    pub user_id: i64,
    pub company_id: i64,
    pub prompt_id: i64,
    pub person_id: Option<i64>,
    pub request_type: RequestType,
    pub provider: String,
    pub usage: Usage,
    pub response_time_ms: i64,
}

pub fn record_usage(conn: &mut PgConnection, record: &UsageRecord) -> QueryResult<AiUsageTracker> {
    let row = NewAiUsageTracker {
        uuid: record.uuid,
        user_id: record.user_id,
        company_id: record.company_id,
        prompt_id: record.prompt_id,
        person_id: record.person_id,
        request_type: record.request_type.as_str().to_string(),
        provider: record.provider.clone(),
        input_tokens: clamp_i32(i64::from(record.usage.input_tokens)),
        output_tokens: clamp_i32(i64::from(record.usage.output_tokens)),
        tokens_used: clamp_i32(i64::from(record.usage.total_tokens)),
        cost_usd: record.usage.cost_usd,
        response_time_ms: clamp_i32(record.response_time_ms),
    };

    diesel::insert_into(ai_usage_trackers::table)
        .values(&row)
        .returning(AiUsageTracker::as_returning())
        .get_result(conn)
}

pub fn record_conversation(
    conn: &mut PgConnection,
    usage_id: i64,
    user_message: &str,
    ai_response: &str,
    expires_at: NaiveDateTime,
) -> QueryResult<()> {
    diesel::insert_into(ai_conversations::table)
        .values(&NewAiConversation {
            usage_id,
            user_message,
            ai_response,
            expires_at,
        })
        .execute(conn)?;
    Ok(())
}

/// Hard-deletes conversations past their retention window.
pub fn purge_expired_conversations(conn: &mut PgConnection, now: NaiveDateTime) -> QueryResult<usize> {
    diesel::delete(ai_conversations::table.filter(ai_conversations::expires_at.le(now))).execute(conn)
}

pub fn send_feedback(
    conn: &mut PgConnection,
    user_id: i64,
    company_id: i64,
    usage_uuid: Uuid,
    verdict: FeedbackVerdict,
    comment: Option<&str>,
) -> AppResult<AiUsageTracker> {
    let comment = comment.map(str::trim).filter(|comment| !comment.is_empty());
    diesel::update(
        ai_usage_trackers::table
            .filter(ai_usage_trackers::uuid.eq(usage_uuid))
            .filter(ai_usage_trackers::user_id.eq(user_id))
            .filter(ai_usage_trackers::company_id.eq(company_id)),
    )
    .set((
        ai_usage_trackers::feedback.eq(Some(verdict.as_str())),
        ai_usage_trackers::feedback_comment.eq(comment),
        ai_usage_trackers::updated_at.eq(Utc::now().naive_utc()),
    ))
    .returning(AiUsageTracker::as_returning())
    .get_result(conn)
    .map_err(AppError::from)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UsagePeriod {
    Today,
    Week,
    Month,
    Year,
    All,
}

impl UsagePeriod {
    pub fn as_str(&self) -> &'static str {
        match self {
            UsagePeriod::Today => "today",
            UsagePeriod::Week => "week",
            UsagePeriod::Month => "month",
            UsagePeriod::Year => "year",
            UsagePeriod::All => "all",
        }
    }

    /// Inclusive lower bound of the window ending at `now`.
    pub fn since(&self, now: DateTime<Utc>) -> Option<NaiveDateTime> {
        let now = now.naive_utc();
        match self {
            UsagePeriod::Today => Some(now.date().and_time(chrono::NaiveTime::MIN)),
            UsagePeriod::Week => Some(now - Duration::days(7)),
            UsagePeriod::Month => now.checked_sub_months(Months::new(1)),
            UsagePeriod::Year => now.checked_sub_months(Months::new(12)),
            UsagePeriod::All => None,
        }
    }
}

impl FromStr for UsagePeriod {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "today" => Ok(UsagePeriod::Today),
            "week" => Ok(UsagePeriod::Week),
            "month" => Ok(UsagePeriod::Month),
            "year" => Ok(UsagePeriod::Year),
            "all" => Ok(UsagePeriod::All),
            other => Err(AppError::bad_request(format!(
                "invalid period '{other}', expected one of: today, week, month, year, all"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsageReport {
    pub period: UsagePeriod,
    pub total_requests: i64,
    pub total_tokens: i64,
    pub total_cost_usd: f64,
    pub average_response_ms: f64,
    pub helpful_count: i64,
    pub unhelpful_count: i64,
}

/// Aggregates over one user's trackers in a period. Sums are `None` when
/// no row matched.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct UsageTotals {
    pub requests: i64,
    pub tokens: Option<i64>,
    pub cost_usd: Option<f64>,
    pub response_ms: Option<i64>,
    pub helpful: i64,
    pub unhelpful: i64,
}

pub fn usage_report(
    conn: &mut PgConnection,
    user_id: i64,
    period: UsagePeriod,
    now: DateTime<Utc>,
) -> AppResult<UsageReport> {
    let since = period.since(now);
    let scoped = || {
        let mut query = ai_usage_trackers::table
            .filter(ai_usage_trackers::user_id.eq(user_id))
            .into_boxed();
        if let Some(since) = since {
            query = query.filter(ai_usage_trackers::created_at.ge(since));
        }
        query
    };

    let (requests, tokens, cost_usd, response_ms) = scoped()
        .select((
            count_star(),
            sum(ai_usage_trackers::tokens_used),
            sum(ai_usage_trackers::cost_usd),
            sum(ai_usage_trackers::response_time_ms),
        ))
        .first::<(i64, Option<i64>, Option<f64>, Option<i64>)>(conn)?;

    let mut feedback_count = |verdict: FeedbackVerdict| -> QueryResult<i64> {
        scoped()
            .filter(ai_usage_trackers::feedback.eq(verdict.as_str()))
            .count()
            .get_result(conn)
    };
    let helpful = feedback_count(FeedbackVerdict::Helpful)?;
    let unhelpful = feedback_count(FeedbackVerdict::NotHelpful)?;

    Ok(build_report(
        period,
        UsageTotals {
            requests,
            tokens,
            cost_usd,
            response_ms,
            helpful,
            unhelpful,
        },
    ))
}

pub fn build_report(period: UsagePeriod, totals: UsageTotals) -> UsageReport {
    let average_response_ms = match totals.response_ms {
        Some(total) if totals.requests > 0 => total as f64 / totals.requests as f64,
        _ => 0.0,
    };
    UsageReport {
        period,
        total_requests: totals.requests,
        total_tokens: totals.tokens.unwrap_or(0),
        total_cost_usd: totals.cost_usd.unwrap_or(0.0),
        average_response_ms,
        helpful_count: totals.helpful,
        unhelpful_count: totals.unhelpful,
    }
}

fn clamp_i32(value: i64) -> i32 {
    i32::try_from(value).unwrap_or(if value < 0 { 0 } else { i32::MAX })
}
