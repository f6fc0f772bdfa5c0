use anyhow::Result;
use tracing::info;
use uuid::Uuid;

use dtp_types::models::HospitalType;

use crate::models::HospitalRow;
use crate::queries::insert_hospital;
use crate::{Database, now_timestamp};

/// Ogun State facilities the service was first deployed for.
pub const DEFAULT_HOSPITALS: &[(&str, &str, HospitalType)] = &[
    ("State Hospital, Ijaiye", "Ijaiye", HospitalType::State),
    ("Oba Ademola Mart. Hospital", "Abeokuta", HospitalType::Specialist),
    ("General Hospital, Isaga Orile", "Isaga Orile", HospitalType::General),
    ("Nafdac", "Ogun State", HospitalType::General),
    ("General Hospital, Odeda", "Odeda", HospitalType::General),
    ("General Hospital, Owode Egba", "Owode Egba", HospitalType::General),
    ("General Hospital, Iberekodo", "Iberekodo", HospitalType::General),
    ("Olikoye Ransome Kuti Mem. Hospital", "Abeokuta", HospitalType::Specialist),
    ("Comm. Psy. Oke Ilewo", "Abeokuta", HospitalType::Specialist),
    ("Dental Centre, Abeokuta", "Abeokuta", HospitalType::Specialist),
    ("Governor's Office Clinic", "Abeokuta", HospitalType::Specialist),
    ("State Hospital, Ijebu Ode", "Ijebu Ode", HospitalType::State),
    ("General Hospital, Ijebu Igbo", "Ijebu Igbo", HospitalType::General),
    ("General Hospital, Ijebu Ife", "Ijebu Ife", HospitalType::General),
    ("General Hospital, Ibiade", "Ibiade", HospitalType::General),
    ("General Hospital, Ogbere", "Ogbere", HospitalType::General),
    ("General Hospital, Ala Idowa", "Ala Idowa", HospitalType::General),
    ("General Hospital, Odogbolu", "Odogbolu", HospitalType::General),
    ("General Hospital, Omu Ijebu", "Omu Ijebu", HospitalType::General),
    ("General Hospital, Atan Ijebu", "Atan Ijebu", HospitalType::General),
    ("Dental Centre, Ijebu Ode", "Ijebu Ode", HospitalType::Specialist),
    ("Comm. Psy. Ijebu Ode", "Ijebu Ode", HospitalType::Specialist),
    ("General Hospital, Iperu", "Iperu", HospitalType::General),
    ("State Hospital, Isara", "Isara", HospitalType::State),
    ("General Hospital, Ode Lemo", "Ode Lemo", HospitalType::General),
    ("General Hospital, Ikenne", "Ikenne", HospitalType::General),
    ("General Hospital, Ilisan", "Ilisan", HospitalType::General),
    ("Dental Centre, Sagamu", "Sagamu", HospitalType::Specialist),
    ("State Hospital, Ota", "Ota", HospitalType::State),
    ("General Hospital, Ifo", "Ifo", HospitalType::General),
    ("Comm. Psy. Ota", "Ota", HospitalType::Specialist),
    ("State Hospital, Ilaro", "Ilaro", HospitalType::State),
    ("General Hospital, Ayetoro", "Ayetoro", HospitalType::General),
    ("General Hospital, Imeko", "Imeko", HospitalType::General),
    ("General Hospital, Idiroko", "Idiroko", HospitalType::General),
    ("General Hospital, Ipokia", "Ipokia", HospitalType::General),
    ("Comm. Psy. Ilaro", "Ilaro", HospitalType::Specialist),
];

/// Inserts `hospitals` when the directory is empty. Returns how many rows
/// were written; zero means the directory was already populated.
pub fn seed_hospitals(db: &Database, hospitals: &[(&str, &str, HospitalType)]) -> Result<usize> {
    if db.count_hospitals()? > 0 {
        info!("Hospitals already initialized");
        return Ok(0);
    }

    let created_at = now_timestamp();
    db.with_conn_mut(|conn| {
        let tx = conn.transaction()?;
        for (name, location, kind) in hospitals {
            let row = HospitalRow {
                id: Uuid::new_v4().to_string(),
                name: name.to_string(),
                location: location.to_string(),
                kind: kind.as_str().to_string(),
                active: true,
            };
            insert_hospital(&tx, &row, &created_at)?;
        }
        tx.commit()?;
        Ok(())
    })?;

    info!("Seeded {} hospitals", hospitals.len());
    Ok(hospitals.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeds_once_and_sorts_by_name() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(seed_hospitals(&db, DEFAULT_HOSPITALS).unwrap(), DEFAULT_HOSPITALS.len());
        assert_eq!(seed_hospitals(&db, DEFAULT_HOSPITALS).unwrap(), 0);

        let listed = db.list_active_hospitals().unwrap();
        assert_eq!(listed.len(), DEFAULT_HOSPITALS.len());
        assert!(listed.windows(2).all(|w| w[0].name <= w[1].name));
        assert!(db.hospital_exists("Nafdac").unwrap());
        assert!(!db.hospital_exists("Unknown Clinic").unwrap());
    }
}
