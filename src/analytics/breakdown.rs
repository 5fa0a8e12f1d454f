use serde::{Deserialize, Serialize};
use sqlx::{QueryBuilder, Sqlite};
use std::str::FromStr;

use super::filters::LogFilters;
use super::stats::percentage;
use super::AnalyticsEngine;
use crate::models::LogLevel;
use crate::store::StoreError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusGrouping {
    #[default]
    Category,
    Code,
}

impl FromStr for StatusGrouping {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "category" => Ok(Self::Category),
            "code" => Ok(Self::Code),
            other => Err(format!("unknown groupBy '{}', expected category or code", other)),
        }
    }
}

/// `(category, label)` of a status code
pub fn status_category(status: u16) -> (&'static str, &'static str) {
    match status {
        200..=299 => ("2xx", "Success"),
        300..=399 => ("3xx", "Redirection"),
        400..=499 => ("4xx", "Client Error"),
        500..=599 => ("5xx", "Server Error"),
        _ => ("Other", "Other"),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusGroup {
    /// Set when grouping by exact code
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    pub category: &'static str,
    pub label: &'static str,
    pub count: i64,
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LevelGroup {
    pub level: LogLevel,
    pub count: i64,
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Breakdown<T> {
    pub breakdown: Vec<T>,
    pub total: i64,
}

impl AnalyticsEngine {
    /// Code groups ascend by code; category groups descend by count.
    pub async fn status_breakdown(
        &self,
        filters: &LogFilters,
        grouping: StatusGrouping,
    ) -> Result<Breakdown<StatusGroup>, StoreError> {
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT status, COUNT(*) FROM log_events");
        filters.push_where(&mut qb, false);
        qb.push(" GROUP BY status ORDER BY status");

        let rows: Vec<(i64, i64)> = qb.build_query_as().fetch_all(self.pool()).await?;
        let total: i64 = rows.iter().map(|(_, count)| count).sum();

        let groups = match grouping {
            StatusGrouping::Code => rows
                .into_iter()
                .map(|(status, count)| {
                    let status = u16::try_from(status).unwrap_or(0);
                    let (category, label) = status_category(status);
                    StatusGroup {
                        status: Some(status),
                        category,
                        label,
                        count,
                        percentage: percentage(count, total),
                    }
                })
                .collect(),
            StatusGrouping::Category => {
                let mut groups: Vec<StatusGroup> = Vec::new();
                for (status, count) in rows {
                    let (category, label) = status_category(u16::try_from(status).unwrap_or(0));
                    match groups.iter_mut().find(|g| g.category == category) {
                        Some(group) => group.count += count,
                        None => groups.push(StatusGroup {
                            status: None,
                            category,
                            label,
                            count,
                            percentage: 0.0,
                        }),
                    }
                }
                for group in &mut groups {
                    group.percentage = percentage(group.count, total);
                }
                groups.sort_by(|a, b| b.count.cmp(&a.count).then(a.category.cmp(&b.category)));
                groups
            }
        };

        Ok(Breakdown {
            breakdown: groups,
            total,
        })
    }

    /// Groups ascend by severity.
    pub async fn level_breakdown(&self, filters: &LogFilters) -> Result<Breakdown<LevelGroup>, StoreError> {
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT level, COUNT(*) FROM log_events");
        filters.push_where(&mut qb, false);
        qb.push(" GROUP BY level");

        let rows: Vec<(String, i64)> = qb.build_query_as().fetch_all(self.pool()).await?;
        let total: i64 = rows.iter().map(|(_, count)| count).sum();

        let mut groups = rows
            .into_iter()
            .map(|(level, count)| {
                let level = level.parse().map_err(StoreError::CorruptRow)?;
                Ok(LevelGroup {
                    level,
                    count,
                    percentage: percentage(count, total),
                })
            })
            .collect::<Result<Vec<_>, StoreError>>()?;
        groups.sort_by_key(|g| g.level);

        Ok(Breakdown {
            breakdown: groups,
            total,
        })
    }
}
