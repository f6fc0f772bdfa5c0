//! Role and hospital based access rules.
//!
//! Route handlers call [`authorize`] once with the roles allowed on the
//! route and, for per-resource checks, the hospital that owns the target.
//! Report visibility is expressed as a [`ReportScope`] so the same rule
//! drives list filtering and single-report checks.

use dtp_db::models::ReportFilter;
use dtp_types::api::UserProfile;
use dtp_types::models::Role;
use uuid::Uuid;

use crate::error::ApiError;

/// Every admin role.
pub const ADMINS: &[Role] = &[Role::HospitalAdmin, Role::NafdacAdmin, Role::StateAdmin];

/// Roles that may moderate reports and accounts.
pub const MODERATORS: &[Role] = &[Role::HospitalAdmin, Role::StateAdmin];

pub const STATE_ONLY: &[Role] = &[Role::StateAdmin];

/// Fails with 403 unless the caller's role is in `allowed` and, for hospital
/// admins, `hospital` (when given) is the caller's own hospital.
pub fn authorize(caller: &UserProfile, allowed: &[Role], hospital: Option<&str>) -> Result<(), ApiError> {
    if !allowed.contains(&caller.role) {
        return Err(ApiError::forbidden());
    }
    if caller.role == Role::HospitalAdmin {
        if let Some(target) = hospital {
            if target != caller.hospital {
                return Err(ApiError::forbidden());
            }
        }
    }
    Ok(())
}

/// The set of reports a caller may see.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportScope {
    Owner(Uuid),
    Hospital(String),
    All,
}

impl ReportScope {
    pub fn for_caller(caller: &UserProfile) -> Self {
        match caller.role {
            Role::Pharmacist => ReportScope::Owner(caller.id),
            Role::HospitalAdmin => ReportScope::Hospital(caller.hospital.clone()),
            Role::NafdacAdmin | Role::StateAdmin => ReportScope::All,
        }
    }

    pub fn permits(&self, owner: &str, hospital: &str) -> bool {
        match self {
            ReportScope::Owner(id) => owner == id.to_string(),
            ReportScope::Hospital(name) => hospital == name,
            ReportScope::All => true,
        }
    }

    /// Writes the mandatory scope into a filter. User supplied filters are
    /// ANDed on top and can only narrow it.
    pub fn apply(&self, filter: &mut ReportFilter) {
        match self {
            ReportScope::Owner(id) => filter.pharmacist_id = Some(id.to_string()),
            ReportScope::Hospital(name) => filter.scope_hospital = Some(name.clone()),
            ReportScope::All => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn caller(role: Role, hospital: &str) -> UserProfile {
        UserProfile {
            id: Uuid::new_v4(),
            name: "Caller".into(),
            email: "caller@dtp.ng".into(),
            hospital: hospital.into(),
            phone: None,
            registration_number: None,
            role,
            approved: true,
            last_login: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn role_allowlist() {
        let pharmacist = caller(Role::Pharmacist, "H1");
        assert!(authorize(&pharmacist, ADMINS, None).is_err());
        let nafdac = caller(Role::NafdacAdmin, "Nafdac");
        assert!(authorize(&nafdac, ADMINS, None).is_ok());
        assert!(authorize(&nafdac, MODERATORS, None).is_err());
    }

    #[test]
    fn hospital_admin_is_limited_to_own_hospital() {
        let admin = caller(Role::HospitalAdmin, "H1");
        assert!(authorize(&admin, MODERATORS, Some("H1")).is_ok());
        assert!(authorize(&admin, MODERATORS, Some("H2")).is_err());

        let state = caller(Role::StateAdmin, "HQ");
        assert!(authorize(&state, MODERATORS, Some("H2")).is_ok());
    }

    #[test]
    fn scope_rules() {
        let pharmacist = caller(Role::Pharmacist, "H1");
        let scope = ReportScope::for_caller(&pharmacist);
        assert!(scope.permits(&pharmacist.id.to_string(), "H9"));
        assert!(!scope.permits(&Uuid::new_v4().to_string(), "H1"));

        let admin = caller(Role::HospitalAdmin, "H1");
        let scope = ReportScope::for_caller(&admin);
        assert!(scope.permits("anyone", "H1"));
        assert!(!scope.permits("anyone", "H2"));

        let mut filter = ReportFilter::default();
        scope.apply(&mut filter);
        assert_eq!(filter.scope_hospital.as_deref(), Some("H1"));
        assert!(filter.pharmacist_id.is_none());

        assert_eq!(ReportScope::for_caller(&caller(Role::StateAdmin, "HQ")), ReportScope::All);
    }
}
