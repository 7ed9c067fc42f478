//! Company dashboard: the people list plus four statistics read in parallel.

use async_trait::async_trait;
use chrono::{NaiveDateTime, Utc};
use serde::Serialize;
use tracing::warn;

use crate::error::{AppError, AppResult};
use crate::models::Person;
use crate::notes::stats;
use crate::people;
use crate::state::AppState;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DashboardStats {
    pub total_people: i64,
    pub one_on_ones_this_month: i64,
    pub average_frequency_days: f64,
    pub last_meeting_date: Option<NaiveDateTime>,
}

#[derive(Debug, Clone)]
pub struct Dashboard {
    pub people: Vec<Person>,
    pub stats: DashboardStats,
}

/// The five reads behind a dashboard.
#[async_trait]
pub trait DashboardSource: Send + Sync {
    async fn people(&self, company_id: i64) -> AppResult<Vec<Person>>;
    async fn people_count(&self, company_id: i64) -> AppResult<i64>;
    async fn one_on_ones_this_month(&self, company_id: i64) -> AppResult<i64>;
    async fn average_frequency_days(&self, company_id: i64) -> AppResult<f64>;
    async fn last_meeting_date(&self, company_id: i64) -> AppResult<Option<NaiveDateTime>>;
}

pub struct DatabaseDashboardSource {
    state: AppState,
}

impl DatabaseDashboardSource {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }
}

#[async_trait]
impl DashboardSource for DatabaseDashboardSource {
    async fn people(&self, company_id: i64) -> AppResult<Vec<Person>> {
        self.state
            .with_db(move |conn| people::list_people(conn, company_id, None))
            .await
    }

    async fn people_count(&self, company_id: i64) -> AppResult<i64> {
        self.state
            .with_db(move |conn| {
                stats::count_active_people(conn, company_id).map_err(AppError::from)
            })
            .await
    }

    async fn one_on_ones_this_month(&self, company_id: i64) -> AppResult<i64> {
        self.state
            .with_db(move |conn| {
                stats::one_on_ones_this_month(conn, company_id, Utc::now().naive_utc())
                    .map_err(AppError::from)
            })
            .await
    }

    async fn average_frequency_days(&self, company_id: i64) -> AppResult<f64> {
        self.state
            .with_db(move |conn| {
                stats::average_frequency_days(conn, company_id).map_err(AppError::from)
            })
            .await
    }

    async fn last_meeting_date(&self, company_id: i64) -> AppResult<Option<NaiveDateTime>> {
        self.state
            .with_db(move |conn| stats::last_meeting_date(conn, company_id).map_err(AppError::from))
            .await
    }
}

/// Runs all five reads concurrently and waits for every one of them.
pub async fn load_dashboard(source: &dyn DashboardSource, company_id: i64) -> AppResult<Dashboard> {
    let (people, total, one_on_ones, frequency, last_meeting) = tokio::join!(
        source.people(company_id),
        source.people_count(company_id),
        source.one_on_ones_this_month(company_id),
        source.average_frequency_days(company_id),
        source.last_meeting_date(company_id),
    );
    assemble_dashboard(company_id, people, total, one_on_ones, frequency, last_meeting)
}

/// The people list is required; each statistic degrades to its zero value.
pub fn assemble_dashboard(
    company_id: i64,
    people: AppResult<Vec<Person>>,
    total_people: AppResult<i64>,
    one_on_ones_this_month: AppResult<i64>,
    average_frequency_days: AppResult<f64>,
    last_meeting_date: AppResult<Option<NaiveDateTime>>,
) -> AppResult<Dashboard> {
    let people = people?;
    let stats = DashboardStats {
        total_people: or_default(company_id, "total_people", total_people),
        one_on_ones_this_month: or_default(
            company_id,
            "one_on_ones_this_month",
            one_on_ones_this_month,
        ),
        average_frequency_days: or_default(
            company_id,
            "average_frequency_days",
            average_frequency_days,
        ),
        last_meeting_date: or_default(company_id, "last_meeting_date", last_meeting_date),
    };
    Ok(Dashboard { people, stats })
}

fn or_default<T: Default>(company_id: i64, statistic: &str, result: AppResult<T>) -> T {
    result.unwrap_or_else(|err| {
        warn!(company_id, statistic, error = %err, "dashboard statistic unavailable");
        T::default()
    })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use chrono::NaiveDate;

    use super::*;

    fn meeting_day() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, 2)
            .unwrap()
            .and_hms_opt(14, 0, 0)
            .unwrap()
    }

    struct FlakySource {
        fail_people: bool,
        finished: AtomicUsize,
    }

    impl FlakySource {
        fn new(fail_people: bool) -> Self {
            Self {
                fail_people,
                finished: AtomicUsize::new(0),
            }
        }

        async fn settle(&self) {
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.finished.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl DashboardSource for FlakySource {
        async fn people(&self, _company_id: i64) -> AppResult<Vec<Person>> {
            self.settle().await;
            if self.fail_people {
                Err(AppError::internal("people query failed"))
            } else {
                Ok(Vec::new())
            }
        }

        async fn people_count(&self, _company_id: i64) -> AppResult<i64> {
            self.settle().await;
            Ok(4)
        }

        async fn one_on_ones_this_month(&self, _company_id: i64) -> AppResult<i64> {
            self.settle().await;
            Err(AppError::internal("relation \"notes\" is locked"))
        }

        async fn average_frequency_days(&self, _company_id: i64) -> AppResult<f64> {
            self.settle().await;
            Ok(5.0)
        }

        async fn last_meeting_date(&self, _company_id: i64) -> AppResult<Option<NaiveDateTime>> {
            self.settle().await;
            Ok(Some(meeting_day()))
        }
    }

    #[tokio::test]
    async fn failed_statistic_degrades_to_zero() {
        let source = FlakySource::new(false);
        let dashboard = load_dashboard(&source, 1).await.unwrap();

        assert_eq!(
            dashboard.stats,
            DashboardStats {
                total_people: 4,
                one_on_ones_this_month: 0,
                average_frequency_days: 5.0,
                last_meeting_date: Some(meeting_day()),
            }
        );
        assert_eq!(source.finished.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn people_failure_is_fatal_but_waits_for_all_reads() {
        let source = FlakySource::new(true);
        let err = load_dashboard(&source, 1).await.unwrap_err();

        assert_eq!(err.status(), axum::http::StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(source.finished.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn every_statistic_can_fail_independently() {
        let dashboard = assemble_dashboard(
            1,
            Ok(Vec::new()),
            Err(AppError::internal("x")),
            Err(AppError::internal("x")),
            Err(AppError::internal("x")),
            Err(AppError::internal("x")),
        )
        .unwrap();
        assert_eq!(dashboard.stats, DashboardStats::default());
    }
}
