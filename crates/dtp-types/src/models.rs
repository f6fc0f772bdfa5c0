use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Returned when a stored or submitted string does not name a known variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl fmt::Display for UnknownVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown {} '{}'", self.kind, self.value)
    }
}

impl std::error::Error for UnknownVariant {}

/// Closed string enums shared by the API and the database layer.
/// The serde names and the stored column values are the same strings.
macro_rules! string_enum {
    ($(#[$meta:meta])* $name:ident, $kind:literal { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(
                #[serde(rename = $text)]
                $variant,
            )+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(UnknownVariant { kind: $kind, value: other.to_string() }),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

string_enum!(
    /// Account role. Decides which routes a caller may use and which
    /// reports they can see.
    Role, "role" {
        Pharmacist => "pharmacist",
        HospitalAdmin => "hospital_admin",
        NafdacAdmin => "nafdac_admin",
        StateAdmin => "state_admin",
    }
);

impl Role {
    /// Admins whose view spans every hospital.
    pub fn is_statewide(&self) -> bool {
        matches!(self, Role::NafdacAdmin | Role::StateAdmin)
    }
}

string_enum!(
    Severity, "severity" {
        Mild => "mild",
        Moderate => "moderate",
        Severe => "severe",
    }
);

string_enum!(
    /// Drug therapy problem category. `Other` carries a free-text
    /// `customCategory` on the report.
    DtpCategory, "DTP category" {
        WrongDrug => "Wrong drug",
        WrongDose => "Wrong dose",
        WrongFrequencyDuration => "Wrong frequency/duration",
        DrugInteraction => "Drug interaction",
        AllergyAdverseReaction => "Allergy/adverse reaction",
        MonitoringNeeded => "Monitoring needed",
        DrugOmission => "Drug omission",
        Other => "Other",
    }
);

string_enum!(
    /// Review state of a report. Expected flow is
    /// submitted -> reviewed -> resolved, but any value may be set by an admin.
    ReportStatus, "report status" {
        Submitted => "submitted",
        Reviewed => "reviewed",
        Resolved => "resolved",
    }
);

string_enum!(
    HospitalType, "hospital type" {
        Federal => "Federal",
        State => "State",
        General => "General",
        Private => "Private",
        Teaching => "Teaching",
        Specialist => "Specialist",
    }
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_names_match_wire_format() {
        let json = serde_json::to_string(&DtpCategory::WrongFrequencyDuration).unwrap();
        assert_eq!(json, "\"Wrong frequency/duration\"");
        let parsed: DtpCategory = "Allergy/adverse reaction".parse().unwrap();
        assert_eq!(parsed, DtpCategory::AllergyAdverseReaction);
    }

    #[test]
    fn unknown_values_are_rejected() {
        let err = "critical".parse::<Severity>().unwrap_err();
        assert_eq!(err.to_string(), "unknown severity 'critical'");
        assert!(serde_json::from_str::<Role>("\"superuser\"").is_err());
    }

    #[test]
    fn statewide_roles() {
        assert!(Role::StateAdmin.is_statewide());
        assert!(Role::NafdacAdmin.is_statewide());
        assert!(!Role::HospitalAdmin.is_statewide());
        assert!(!Role::Pharmacist.is_statewide());
    }
}
