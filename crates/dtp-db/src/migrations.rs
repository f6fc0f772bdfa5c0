use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);"
    )?;

    let version: i64 = conn
        .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |r| r.get(0))?;

    if version < 1 {
        info!("Running migration v1 (initial schema)");
        conn.execute_batch(
            "
            CREATE TABLE users (
                id                   TEXT PRIMARY KEY,
                name                 TEXT NOT NULL,
                email                TEXT NOT NULL UNIQUE,
                password             TEXT NOT NULL,
                hospital             TEXT NOT NULL,
                registration_number  TEXT,
                phone                TEXT,
                role                 TEXT NOT NULL DEFAULT 'pharmacist',
                approved             INTEGER NOT NULL DEFAULT 0,
                last_login           TEXT,
                created_at           TEXT NOT NULL,
                updated_at           TEXT NOT NULL
            );

            CREATE INDEX idx_users_hospital ON users(hospital);
            CREATE INDEX idx_users_role ON users(role);

            CREATE TABLE hospitals (
                id          TEXT PRIMARY KEY,
                name        TEXT NOT NULL UNIQUE,
                location    TEXT NOT NULL,
                type        TEXT NOT NULL,
                active      INTEGER NOT NULL DEFAULT 1,
                created_at  TEXT NOT NULL
            );

            -- pharmacist_id and reviewed_by are plain references: users are
            -- hard deleted while their reports stay.
            CREATE TABLE reports (
                id                    TEXT PRIMARY KEY,
                pharmacist_id         TEXT NOT NULL,
                pharmacist_name       TEXT NOT NULL,
                pharmacist_phone      TEXT,
                hospital_name         TEXT NOT NULL,
                ward                  TEXT,
                prescription_details  TEXT NOT NULL,
                dtp_category          TEXT NOT NULL,
                custom_category       TEXT,
                severity              TEXT NOT NULL,
                prescribing_doctor    TEXT,
                comments              TEXT,
                status                TEXT NOT NULL DEFAULT 'submitted',
                feedback              TEXT,
                reviewed_by           TEXT,
                reviewed_at           TEXT,
                created_at            TEXT NOT NULL,
                updated_at            TEXT NOT NULL
            );

            CREATE INDEX idx_reports_pharmacist ON reports(pharmacist_id);
            CREATE INDEX idx_reports_hospital ON reports(hospital_name);
            CREATE INDEX idx_reports_category ON reports(dtp_category);
            CREATE INDEX idx_reports_severity ON reports(severity);
            CREATE INDEX idx_reports_status ON reports(status);
            CREATE INDEX idx_reports_created ON reports(created_at DESC);

            CREATE TABLE report_photos (
                report_id      TEXT NOT NULL REFERENCES reports(id) ON DELETE CASCADE,
                position       INTEGER NOT NULL,
                url            TEXT NOT NULL,
                thumbnail_url  TEXT,
                file_id        TEXT NOT NULL,
                original_name  TEXT NOT NULL,
                size           INTEGER NOT NULL,
                mimetype       TEXT NOT NULL,
                PRIMARY KEY (report_id, position)
            );

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_are_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run(&conn).unwrap();
        run(&conn).unwrap();
        let versions: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_version", [], |r| r.get(0))
            .unwrap();
        assert_eq!(versions, 1);
    }
}
