/// Database row types. These map directly to SQLite rows.
/// Distinct from dtp-types API models to keep the DB layer independent.

#[derive(Debug, Clone)]
pub struct UserRow {
    pub id: String,
    pub name: String,
    pub email: String,
    pub password: String,
    pub hospital: String,
    pub registration_number: Option<String>,
    pub phone: Option<String>,
    pub role: String,
    pub approved: bool,
    pub last_login: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone)]
pub struct HospitalRow {
    pub id: String,
    pub name: String,
    pub location: String,
    pub kind: String,
    pub active: bool,
}

#[derive(Debug, Clone)]
pub struct ReportRow {
    pub id: String,
    pub pharmacist_id: String,
    pub pharmacist_name: String,
    pub pharmacist_phone: Option<String>,
    pub hospital_name: String,
    pub ward: Option<String>,
    pub prescription_details: String,
    pub dtp_category: String,
    pub custom_category: Option<String>,
    pub severity: String,
    pub prescribing_doctor: Option<String>,
    pub comments: Option<String>,
    pub status: String,
    pub feedback: Option<String>,
    pub reviewed_by: Option<String>,
    /// Joined from `users`; `None` once the reviewer account is deleted.
    pub reviewed_by_name: Option<String>,
    pub reviewed_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub photos: Vec<PhotoRow>,
}

#[derive(Debug, Clone)]
pub struct PhotoRow {
    pub report_id: String,
    pub position: i64,
    pub url: String,
    pub thumbnail_url: Option<String>,
    pub file_id: String,
    pub original_name: String,
    pub size: i64,
    pub mimetype: String,
}

/// Row-level filter for report reads. The scope fields come from the
/// caller's role; the rest are user supplied. All set fields are ANDed.
#[derive(Debug, Clone, Default)]
pub struct ReportFilter {
    pub pharmacist_id: Option<String>,
    pub scope_hospital: Option<String>,
    pub hospital: Option<String>,
    pub category: Option<String>,
    pub severity: Option<String>,
    pub status: Option<String>,
    /// Inclusive lower bound on `created_at`, stored timestamp layout.
    pub created_from: Option<String>,
    /// Inclusive upper bound on `created_at`, stored timestamp layout.
    pub created_to: Option<String>,
}

/// Status/feedback change applied by an admin.
#[derive(Debug, Clone, Default)]
pub struct ReportUpdate {
    pub status: Option<String>,
    pub feedback: Option<String>,
    pub reviewed_by: Option<String>,
    pub reviewed_at: Option<String>,
    pub updated_at: String,
}
