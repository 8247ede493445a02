//! Package search projection
//!
//! Free text matches tracking numbers and recipient names; optional filters
//! narrow by status, department, and registration date range. Ordering is
//! newest-first with an id tie-break so paging is stable.

use chrono::{DateTime, Utc};
use libsql::Connection;
use serde::Serialize;

use super::{next_row, parse_uuid, PackageCore};
use crate::domain::PackageStatus;
use crate::error::{Error, Result};
use crate::store::write_queue::text;
use crate::util::{fmt_ts, parse_ts};

/// Hard cap on page size
const LIMIT_MAX: u32 = 100;
const LIMIT_DEFAULT: u32 = 25;

/// Search inputs
#[derive(Debug, Clone, Default)]
pub struct PackageSearch {
    pub query: Option<String>,
    pub status: Option<PackageStatus>,
    pub department: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub page: u32,
    pub limit: u32,
}

/// One search result row, joined with the recipient
#[derive(Debug, Clone, Serialize)]
pub struct PackageSummary {
    pub id: uuid::Uuid,
    pub tracking_no: String,
    pub carrier: String,
    pub status: PackageStatus,
    pub recipient_name: String,
    pub department: String,
    pub created_at: DateTime<Utc>,
}

fn build_search_sql(search: &PackageSearch) -> (String, Vec<libsql::Value>) {
    let mut sql = String::from(
        "SELECT p.id, p.tracking_no, p.carrier, p.status, r.name, r.department, p.created_at \
         FROM packages p JOIN recipients r ON r.id = p.recipient_id WHERE 1=1",
    );
    let mut params: Vec<libsql::Value> = Vec::new();

    if let Some(query) = search.query.as_deref().map(str::trim).filter(|q| !q.is_empty()) {
        let pattern = format!("%{}%", like_escape(query));
        params.push(text(pattern));
        let idx = params.len();
        sql.push_str(&format!(
            " AND (p.tracking_no LIKE ?{idx} ESCAPE '\\' OR r.name LIKE ?{idx} ESCAPE '\\')"
        ));
    }
    if let Some(status) = search.status {
        params.push(text(status.as_str()));
        sql.push_str(&format!(" AND p.status = ?{}", params.len()));
    }
    if let Some(department) = search
        .department
        .as_deref()
        .map(str::trim)
        .filter(|d| !d.is_empty())
    {
        params.push(text(department.to_string()));
        sql.push_str(&format!(" AND r.department = ?{}", params.len()));
    }
    if let Some(from) = search.from {
        params.push(text(fmt_ts(from)));
        sql.push_str(&format!(" AND p.created_at >= ?{}", params.len()));
    }
    if let Some(to) = search.to {
        params.push(text(fmt_ts(to)));
        sql.push_str(&format!(" AND p.created_at <= ?{}", params.len()));
    }

    let limit = match search.limit {
        0 => LIMIT_DEFAULT,
        n => n.min(LIMIT_MAX),
    };
    let offset = (search.page.max(1) - 1) as i64 * limit as i64;
    sql.push_str(&format!(
        " ORDER BY p.created_at DESC, p.id DESC LIMIT {} OFFSET {}",
        limit, offset
    ));

    (sql, params)
}

fn like_escape(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

impl PackageCore {
    /// Run the search projection over a read handle
    pub async fn search(
        &self,
        conn: &Connection,
        search: &PackageSearch,
    ) -> Result<Vec<PackageSummary>> {
        let (sql, params) = build_search_sql(search);
        let mut rows = conn
            .query(&sql, params)
            .await
            .map_err(|e| Error::Store(format!("package search failed: {}", e)))?;

        let mut result = Vec::new();
        while let Some(row) = next_row(&mut rows).await? {
            let read =
                |field: &str, e: libsql::Error| Error::Store(format!("search {}: {}", field, e));

            let id_str: String = row.get(0).map_err(|e| read("id", e))?;
            let status_str: String = row.get(3).map_err(|e| read("status", e))?;
            let created_str: String = row.get(6).map_err(|e| read("created_at", e))?;

            result.push(PackageSummary {
                id: parse_uuid(&id_str)?,
                tracking_no: row.get(1).map_err(|e| read("tracking_no", e))?,
                carrier: row.get(2).map_err(|e| read("carrier", e))?,
                status: PackageStatus::parse(&status_str)
                    .ok_or_else(|| Error::Store(format!("unknown status '{}'", status_str)))?,
                recipient_name: row.get(4).map_err(|e| read("recipient", e))?,
                department: row
                    .get::<String>(5)
                    .ok()
                    .unwrap_or_else(|| "Unassigned".into()),
                created_at: parse_ts(&created_str)?,
            });
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packages::tests::{fixture, seed_recipient};
    use crate::packages::NewPackage;
    use tempfile::TempDir;

    #[test]
    fn test_sql_builder_applies_filters_in_order() {
        let (sql, params) = build_search_sql(&PackageSearch {
            query: Some("1Z".into()),
            status: Some(PackageStatus::Registered),
            department: Some("Finance".into()),
            page: 2,
            limit: 10,
            ..Default::default()
        });
        assert!(sql.contains("p.tracking_no LIKE ?1"));
        assert!(sql.contains("r.name LIKE ?1"));
        assert!(sql.contains("p.status = ?2"));
        assert!(sql.contains("r.department = ?3"));
        assert!(sql.ends_with("LIMIT 10 OFFSET 10"));
        assert_eq!(params.len(), 3);
    }

    #[test]
    fn test_limit_is_clamped() {
        let (sql, _) = build_search_sql(&PackageSearch {
            limit: 10_000,
            ..Default::default()
        });
        assert!(sql.contains(&format!("LIMIT {}", LIMIT_MAX)));

        let (sql, _) = build_search_sql(&PackageSearch::default());
        assert!(sql.contains(&format!("LIMIT {}", LIMIT_DEFAULT)));
    }

    #[test]
    fn test_blank_query_adds_no_filter() {
        let (sql, params) = build_search_sql(&PackageSearch {
            query: Some("   ".into()),
            ..Default::default()
        });
        assert!(!sql.contains("LIKE"));
        assert!(params.is_empty());
    }

    #[tokio::test]
    async fn test_search_by_tracking_and_recipient_name() {
        let dir = TempDir::new().unwrap();
        let fx = fixture(&dir).await;
        let recipient = seed_recipient(&fx, "E100").await;

        let conn = fx.store.read_handle().unwrap();
        for tracking in ["1Z-ALPHA", "1Z-BETA", "OTHER-1"] {
            fx.core
                .register(
                    &conn,
                    &fx.actor,
                    NewPackage {
                        tracking_no: tracking.into(),
                        carrier: "UPS".into(),
                        recipient_id: recipient.id,
                        notes: None,
                    },
                    None,
                    None,
                )
                .await
                .unwrap();
        }

        let by_tracking = fx
            .core
            .search(
                &conn,
                &PackageSearch {
                    query: Some("1Z-".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(by_tracking.len(), 2);

        // Recipient-name match reaches all three
        let by_name = fx
            .core
            .search(
                &conn,
                &PackageSearch {
                    query: Some("Pat Recip".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(by_name.len(), 3);

        // Newest first
        assert!(by_name[0].created_at >= by_name[2].created_at);

        fx.queue.shutdown().await;
    }

    #[tokio::test]
    async fn test_status_filter() {
        let dir = TempDir::new().unwrap();
        let fx = fixture(&dir).await;
        let recipient = seed_recipient(&fx, "E100").await;

        let conn = fx.store.read_handle().unwrap();
        let package = fx
            .core
            .register(
                &conn,
                &fx.actor,
                NewPackage {
                    tracking_no: "1Z-1".into(),
                    carrier: "UPS".into(),
                    recipient_id: recipient.id,
                    notes: None,
                },
                None,
                None,
            )
            .await
            .unwrap();
        fx.core
            .change_status(
                &conn,
                &fx.actor,
                package.id,
                PackageStatus::OutForDelivery,
                None,
                None,
            )
            .await
            .unwrap();

        let delivered = fx
            .core
            .search(
                &conn,
                &PackageSearch {
                    status: Some(PackageStatus::Delivered),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(delivered.is_empty());

        let out = fx
            .core
            .search(
                &conn,
                &PackageSearch {
                    status: Some(PackageStatus::OutForDelivery),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(out.len(), 1);

        fx.queue.shutdown().await;
    }
}
