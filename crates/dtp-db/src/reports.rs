use std::collections::HashMap;

use anyhow::Result;
use rusqlite::types::ToSql;
use rusqlite::{Connection, Row};

use crate::models::{PhotoRow, ReportFilter, ReportRow, ReportUpdate};
use crate::queries::OptionalExt;
use crate::Database;

const REPORT_COLUMNS: &str = "r.id, r.pharmacist_id, r.pharmacist_name, r.pharmacist_phone, \
     r.hospital_name, r.ward, r.prescription_details, r.dtp_category, r.custom_category, \
     r.severity, r.prescribing_doctor, r.comments, r.status, r.feedback, r.reviewed_by, \
     u.name, r.reviewed_at, r.created_at, r.updated_at";

impl Database {
    // -- Reports --

    /// Inserts a report and its photos in one transaction.
    pub fn insert_report(&self, report: &ReportRow) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO reports (id, pharmacist_id, pharmacist_name, pharmacist_phone, hospital_name,
                                      ward, prescription_details, dtp_category, custom_category, severity,
                                      prescribing_doctor, comments, status, feedback, reviewed_by,
                                      reviewed_at, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)",
                rusqlite::params![
                    report.id,
                    report.pharmacist_id,
                    report.pharmacist_name,
                    report.pharmacist_phone,
                    report.hospital_name,
                    report.ward,
                    report.prescription_details,
                    report.dtp_category,
                    report.custom_category,
                    report.severity,
                    report.prescribing_doctor,
                    report.comments,
                    report.status,
                    report.feedback,
                    report.reviewed_by,
                    report.reviewed_at,
                    report.created_at,
                    report.updated_at,
                ],
            )?;

            for photo in &report.photos {
                tx.execute(
                    "INSERT INTO report_photos (report_id, position, url, thumbnail_url, file_id,
                                                original_name, size, mimetype)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    rusqlite::params![
                        report.id,
                        photo.position,
                        photo.url,
                        photo.thumbnail_url,
                        photo.file_id,
                        photo.original_name,
                        photo.size,
                        photo.mimetype,
                    ],
                )?;
            }

            tx.commit()?;
            Ok(())
        })
    }

    pub fn get_report(&self, id: &str) -> Result<Option<ReportRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM reports r LEFT JOIN users u ON r.reviewed_by = u.id WHERE r.id = ?1",
                REPORT_COLUMNS
            ))?;
            let Some(mut report) = stmt.query_row([id], map_report).optional()? else {
                return Ok(None);
            };
            report.photos = query_photos(conn, std::slice::from_ref(&report.id))?
                .remove(&report.id)
                .unwrap_or_default();
            Ok(Some(report))
        })
    }

    /// One page of matching reports, newest first, plus the total match count.
    pub fn list_reports(
        &self,
        filter: &ReportFilter,
        limit: u32,
        offset: u64,
    ) -> Result<(Vec<ReportRow>, u64)> {
        self.with_conn(|conn| {
            let (where_sql, params) = build_where(filter);

            let total: i64 = conn.query_row(
                &format!("SELECT COUNT(*) FROM reports r{}", where_sql),
                params_ref(&params).as_slice(),
                |row| row.get(0),
            )?;

            let sql = format!(
                "SELECT {} FROM reports r LEFT JOIN users u ON r.reviewed_by = u.id{}
                 ORDER BY r.created_at DESC, r.id DESC
                 LIMIT {} OFFSET {}",
                REPORT_COLUMNS, where_sql, limit, offset
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt
                .query_map(params_ref(&params).as_slice(), map_report)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            // Batch-fetch photos for the page (eliminates N+1)
            let ids: Vec<String> = rows.iter().map(|r| r.id.clone()).collect();
            let mut photos = query_photos(conn, &ids)?;
            for row in &mut rows {
                row.photos = photos.remove(&row.id).unwrap_or_default();
            }

            Ok((rows, total as u64))
        })
    }

    /// Applies an admin update. Returns false when the report does not exist.
    pub fn update_report(&self, id: &str, update: &ReportUpdate) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE reports SET
                    status      = COALESCE(?2, status),
                    feedback    = COALESCE(?3, feedback),
                    reviewed_by = COALESCE(?4, reviewed_by),
                    reviewed_at = COALESCE(?5, reviewed_at),
                    updated_at  = ?6
                 WHERE id = ?1",
                rusqlite::params![
                    id,
                    update.status,
                    update.feedback,
                    update.reviewed_by,
                    update.reviewed_at,
                    update.updated_at,
                ],
            )?;
            Ok(changed > 0)
        })
    }

    // -- Aggregations --

    /// `(category, count)` ordered by count, largest first.
    pub fn count_reports_by_category(&self, filter: &ReportFilter) -> Result<Vec<(String, u64)>> {
        self.with_conn(|conn| {
            group_count(
                conn,
                "r.dtp_category",
                filter,
                "ORDER BY total DESC, bucket ASC",
            )
        })
    }

    pub fn count_reports_by_severity(&self, filter: &ReportFilter) -> Result<Vec<(String, u64)>> {
        self.with_conn(|conn| group_count(conn, "r.severity", filter, "ORDER BY bucket ASC"))
    }

    /// `("YYYY-MM", count)` in ascending month order.
    pub fn count_reports_by_month(&self, filter: &ReportFilter) -> Result<Vec<(String, u64)>> {
        self.with_conn(|conn| {
            group_count(conn, "substr(r.created_at, 1, 7)", filter, "ORDER BY bucket ASC")
        })
    }

    pub fn top_hospitals(&self, filter: &ReportFilter, limit: u32) -> Result<Vec<(String, u64)>> {
        self.with_conn(|conn| {
            group_count(
                conn,
                "r.hospital_name",
                filter,
                &format!("ORDER BY total DESC, bucket ASC LIMIT {}", limit),
            )
        })
    }
}

fn build_where(filter: &ReportFilter) -> (String, Vec<String>) {
    let mut clauses: Vec<String> = Vec::new();
    let mut params: Vec<String> = Vec::new();

    let mut push = |clause: &str, value: &Option<String>| {
        if let Some(value) = value {
            params.push(value.clone());
            clauses.push(format!("{} ?{}", clause, params.len()));
        }
    };

    push("r.pharmacist_id =", &filter.pharmacist_id);
    push("r.hospital_name =", &filter.scope_hospital);
    push("r.hospital_name =", &filter.hospital);
    push("r.dtp_category =", &filter.category);
    push("r.severity =", &filter.severity);
    push("r.status =", &filter.status);
    push("r.created_at >=", &filter.created_from);
    push("r.created_at <=", &filter.created_to);

    if clauses.is_empty() {
        (String::new(), params)
    } else {
        (format!(" WHERE {}", clauses.join(" AND ")), params)
    }
}

fn params_ref(params: &[String]) -> Vec<&dyn ToSql> {
    params.iter().map(|p| p as &dyn ToSql).collect()
}

fn group_count(
    conn: &Connection,
    key_expr: &str,
    filter: &ReportFilter,
    tail: &str,
) -> Result<Vec<(String, u64)>> {
    let (where_sql, params) = build_where(filter);
    let sql = format!(
        "SELECT {} AS bucket, COUNT(*) AS total FROM reports r{} GROUP BY bucket {}",
        key_expr, where_sql, tail
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_ref(&params).as_slice(), |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn query_photos(conn: &Connection, report_ids: &[String]) -> Result<HashMap<String, Vec<PhotoRow>>> {
    let mut grouped: HashMap<String, Vec<PhotoRow>> = HashMap::new();
    if report_ids.is_empty() {
        return Ok(grouped);
    }

    let placeholders: Vec<String> = (1..=report_ids.len()).map(|i| format!("?{}", i)).collect();
    let sql = format!(
        "SELECT report_id, position, url, thumbnail_url, file_id, original_name, size, mimetype
         FROM report_photos WHERE report_id IN ({}) ORDER BY report_id, position",
        placeholders.join(", ")
    );

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_ref(report_ids).as_slice(), |row| {
            Ok(PhotoRow {
                report_id: row.get(0)?,
                position: row.get(1)?,
                url: row.get(2)?,
                thumbnail_url: row.get(3)?,
                file_id: row.get(4)?,
                original_name: row.get(5)?,
                size: row.get(6)?,
                mimetype: row.get(7)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    for photo in rows {
        grouped.entry(photo.report_id.clone()).or_default().push(photo);
    }
    Ok(grouped)
}

fn map_report(row: &Row<'_>) -> rusqlite::Result<ReportRow> {
    Ok(ReportRow {
        id: row.get(0)?,
        pharmacist_id: row.get(1)?,
        pharmacist_name: row.get(2)?,
        pharmacist_phone: row.get(3)?,
        hospital_name: row.get(4)?,
        ward: row.get(5)?,
        prescription_details: row.get(6)?,
        dtp_category: row.get(7)?,
        custom_category: row.get(8)?,
        severity: row.get(9)?,
        prescribing_doctor: row.get(10)?,
        comments: row.get(11)?,
        status: row.get(12)?,
        feedback: row.get(13)?,
        reviewed_by: row.get(14)?,
        reviewed_by_name: row.get(15)?,
        reviewed_at: row.get(16)?,
        created_at: row.get(17)?,
        updated_at: row.get(18)?,
        photos: Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(id: &str, owner: &str, hospital: &str, category: &str, created_at: &str) -> ReportRow {
        ReportRow {
            id: id.into(),
            pharmacist_id: owner.into(),
            pharmacist_name: "Ada".into(),
            pharmacist_phone: None,
            hospital_name: hospital.into(),
            ward: None,
            prescription_details: "Amoxicillin 500mg".into(),
            dtp_category: category.into(),
            custom_category: None,
            severity: "mild".into(),
            prescribing_doctor: None,
            comments: None,
            status: "submitted".into(),
            feedback: None,
            reviewed_by: None,
            reviewed_by_name: None,
            reviewed_at: None,
            created_at: created_at.into(),
            updated_at: created_at.into(),
            photos: Vec::new(),
        }
    }

    fn photo(position: i64) -> PhotoRow {
        PhotoRow {
            report_id: String::new(),
            position,
            url: format!("https://img/{}", position),
            thumbnail_url: None,
            file_id: format!("f{}", position),
            original_name: format!("p{}.jpg", position),
            size: 1024,
            mimetype: "image/jpeg".into(),
        }
    }

    fn seeded() -> Database {
        let db = Database::open_in_memory().unwrap();
        let mut first = report("r1", "u1", "H1", "Wrong dose", "2025-01-05T10:00:00.000000Z");
        first.photos = vec![photo(0), photo(1)];
        db.insert_report(&first).unwrap();
        db.insert_report(&report("r2", "u2", "H1", "Wrong dose", "2025-02-01T10:00:00.000000Z"))
            .unwrap();
        db.insert_report(&report("r3", "u3", "H2", "Drug omission", "2025-02-03T10:00:00.000000Z"))
            .unwrap();
        db
    }

    #[test]
    fn list_is_newest_first_and_paginated() {
        let db = seeded();
        let (page, total) = db.list_reports(&ReportFilter::default(), 2, 0).unwrap();
        assert_eq!(total, 3);
        let ids: Vec<_> = page.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, ["r3", "r2"]);

        let (rest, _) = db.list_reports(&ReportFilter::default(), 2, 2).unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].photos.len(), 2);
        assert_eq!(rest[0].photos[1].file_id, "f1");
    }

    #[test]
    fn scope_and_filter_are_combined() {
        let db = seeded();
        let filter = ReportFilter {
            scope_hospital: Some("H1".into()),
            hospital: Some("H2".into()),
            ..Default::default()
        };
        let (rows, total) = db.list_reports(&filter, 50, 0).unwrap();
        assert!(rows.is_empty());
        assert_eq!(total, 0);

        let filter = ReportFilter {
            created_from: Some("2025-02-01T00:00:00.000000Z".into()),
            created_to: Some("2025-02-02T00:00:00.000000Z".into()),
            ..Default::default()
        };
        let (rows, _) = db.list_reports(&filter, 50, 0).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, "r2");
    }

    #[test]
    fn update_keeps_unset_fields() {
        let db = seeded();
        let update = ReportUpdate {
            feedback: Some("Dose corrected".into()),
            updated_at: "2025-03-01T00:00:00.000000Z".into(),
            ..Default::default()
        };
        assert!(db.update_report("r1", &update).unwrap());
        let row = db.get_report("r1").unwrap().unwrap();
        assert_eq!(row.status, "submitted");
        assert_eq!(row.feedback.as_deref(), Some("Dose corrected"));
        assert!(!db.update_report("nope", &update).unwrap());
    }

    #[test]
    fn aggregations() {
        let db = seeded();
        let all = ReportFilter::default();
        assert_eq!(
            db.count_reports_by_category(&all).unwrap(),
            vec![("Wrong dose".to_string(), 2), ("Drug omission".to_string(), 1)]
        );
        assert_eq!(
            db.count_reports_by_month(&all).unwrap(),
            vec![("2025-01".to_string(), 1), ("2025-02".to_string(), 2)]
        );
        let top = db.top_hospitals(&all, 1).unwrap();
        assert_eq!(top, vec![("H1".to_string(), 2)]);
    }
}
