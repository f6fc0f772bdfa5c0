use crate::models::{HospitalRow, UserRow};
use crate::Database;
use anyhow::Result;
use rusqlite::{Connection, Row};

const USER_COLUMNS: &str = "id, name, email, password, hospital, registration_number, phone, \
     role, approved, last_login, created_at, updated_at";

impl Database {
    // -- Users --

    /// Returns false when the email is already registered.
    pub fn create_user(&self, user: &UserRow) -> Result<bool> {
        self.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT INTO users (id, name, email, password, hospital, registration_number, phone,
                                    role, approved, last_login, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                rusqlite::params![
                    user.id,
                    user.name,
                    user.email,
                    user.password,
                    user.hospital,
                    user.registration_number,
                    user.phone,
                    user.role,
                    user.approved,
                    user.last_login,
                    user.created_at,
                    user.updated_at,
                ],
            );
            match inserted {
                Ok(_) => Ok(true),
                Err(rusqlite::Error::SqliteFailure(e, _))
                    if e.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    Ok(false)
                }
                Err(e) => Err(e.into()),
            }
        })
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "email", email))
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "id", id))
    }

    pub fn record_login(&self, id: &str, at: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE users SET last_login = ?2, updated_at = ?2 WHERE id = ?1",
                (id, at),
            )?;
            Ok(())
        })
    }

    /// Returns false when no user has the given id.
    pub fn set_password(&self, id: &str, password_hash: &str, at: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE users SET password = ?2, updated_at = ?3 WHERE id = ?1",
                (id, password_hash, at),
            )?;
            Ok(changed > 0)
        })
    }

    pub fn approve_user(&self, id: &str, at: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE users SET approved = 1, updated_at = ?2 WHERE id = ?1",
                (id, at),
            )?;
            Ok(changed > 0)
        })
    }

    pub fn delete_user(&self, id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute("DELETE FROM users WHERE id = ?1", [id])?;
            Ok(changed > 0)
        })
    }

    /// Users newest first, optionally limited to one hospital and/or to
    /// accounts still waiting for approval.
    pub fn list_users(&self, hospital: Option<&str>, pending_only: bool) -> Result<Vec<UserRow>> {
        self.with_conn(|conn| {
            let mut sql = format!("SELECT {} FROM users WHERE 1 = 1", USER_COLUMNS);
            let mut params: Vec<&dyn rusqlite::types::ToSql> = Vec::new();
            if let Some(hospital) = hospital.as_ref() {
                params.push(hospital);
                sql.push_str(&format!(" AND hospital = ?{}", params.len()));
            }
            if pending_only {
                sql.push_str(" AND approved = 0");
            }
            sql.push_str(" ORDER BY created_at DESC");

            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params.as_slice(), map_user)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn list_users_by_role(&self, role: &str) -> Result<Vec<UserRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM users WHERE role = ?1 ORDER BY created_at DESC",
                USER_COLUMNS
            ))?;
            let rows = stmt
                .query_map([role], map_user)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn role_exists(&self, role: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let found: i64 = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM users WHERE role = ?1)",
                [role],
                |row| row.get(0),
            )?;
            Ok(found != 0)
        })
    }

    // -- Hospitals --

    /// Registration accepts any hospital on file, active or not.
    pub fn hospital_exists(&self, name: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let found: i64 = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM hospitals WHERE name = ?1)",
                [name],
                |row| row.get(0),
            )?;
            Ok(found != 0)
        })
    }

    pub fn list_active_hospitals(&self) -> Result<Vec<HospitalRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, name, location, type, active FROM hospitals
                 WHERE active = 1
                 ORDER BY name ASC",
            )?;
            let rows = stmt
                .query_map([], |row| {
                    Ok(HospitalRow {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        location: row.get(2)?,
                        kind: row.get(3)?,
                        active: row.get(4)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn count_hospitals(&self) -> Result<u64> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM hospitals", [], |row| row.get(0))?;
            Ok(count as u64)
        })
    }
}

pub(crate) fn insert_hospital(conn: &Connection, hospital: &HospitalRow, created_at: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO hospitals (id, name, location, type, active, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        rusqlite::params![
            hospital.id,
            hospital.name,
            hospital.location,
            hospital.kind,
            hospital.active,
            created_at,
        ],
    )?;
    Ok(())
}

fn query_user(conn: &Connection, column: &str, value: &str) -> Result<Option<UserRow>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM users WHERE {} = ?1",
        USER_COLUMNS, column
    ))?;

    let row = stmt.query_row([value], map_user).optional()?;

    Ok(row)
}

fn map_user(row: &Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        name: row.get(1)?,
        email: row.get(2)?,
        password: row.get(3)?,
        hospital: row.get(4)?,
        registration_number: row.get(5)?,
        phone: row.get(6)?,
        role: row.get(7)?,
        approved: row.get(8)?,
        last_login: row.get(9)?,
        created_at: row.get(10)?,
        updated_at: row.get(11)?,
    })
}

/// Extension trait for optional query results
pub(crate) trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
