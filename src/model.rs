use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Checkout state shared by vehicles and fuel cards. Audit actions use the
/// same vocabulary: the action of a record is the status a resource moved to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceStatus {
    Returned,
    Taken,
}

impl ResourceStatus {
    /// Anything other than `taken` is available for pickup, including the
    /// legacy `available` literal.
    pub fn from_db(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("taken") {
            ResourceStatus::Taken
        } else {
            ResourceStatus::Returned
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ResourceStatus::Returned => "returned",
            ResourceStatus::Taken => "taken",
        }
    }

    pub fn is_taken(self) -> bool {
        self == ResourceStatus::Taken
    }

    pub fn toggled(self) -> Self {
        match self {
            ResourceStatus::Returned => ResourceStatus::Taken,
            ResourceStatus::Taken => ResourceStatus::Returned,
        }
    }
}

impl fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Vehicle {
    pub id: i32,
    pub plate: String,
    pub status: ResourceStatus,
    pub mileage: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FuelCard {
    pub id: i32,
    pub card_number: String,
    pub status: ResourceStatus,
    pub balance: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct PasswordSlot {
    pub id: i32,
    pub password: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditResource {
    Vehicle(i32),
    FuelCard(i32),
}

/// A record the engine asks the store to append.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditEntry {
    pub resource: AuditResource,
    pub user_id: i64,
    pub action: ResourceStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VehicleRecord {
    pub id: i64,
    pub vehicle_plate: Option<String>,
    pub user_id: i64,
    pub action: ResourceStatus,
    pub timestamp: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GasCardRecord {
    pub id: i64,
    pub gas_card_number: Option<String>,
    pub balance: Option<f64>,
    pub user_id: i64,
    pub action: ResourceStatus,
    pub timestamp: NaiveDateTime,
}

/// Form posted by the lockbox page.
#[derive(Debug, Default, Deserialize)]
pub struct LockForm {
    pub vehicle: Option<String>,
    #[serde(rename = "gasCard")]
    pub gas_card: Option<String>,
    #[serde(rename = "gasCard_custom")]
    pub gas_card_custom: Option<String>,
    pub mileage: Option<String>,
    pub balance: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PostPassword {
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct IssuedPassword {
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct VehicleRecordQuery {
    pub plate: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct GasCardRecordQuery {
    pub card: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_available_status_reads_as_returned() {
        assert_eq!(ResourceStatus::from_db("available"), ResourceStatus::Returned);
        assert_eq!(ResourceStatus::from_db("returned"), ResourceStatus::Returned);
        assert_eq!(ResourceStatus::from_db("taken"), ResourceStatus::Taken);
        assert_eq!(ResourceStatus::from_db(" Taken "), ResourceStatus::Taken);
    }

    #[test]
    fn toggling_flips_status() {
        assert_eq!(ResourceStatus::Taken.toggled(), ResourceStatus::Returned);
        assert_eq!(ResourceStatus::Returned.toggled(), ResourceStatus::Taken);
    }

    #[test]
    fn lock_form_uses_page_field_names() {
        let form: LockForm = serde_json::from_value(serde_json::json!({
            "vehicle": "ABC123",
            "gasCard": "other",
            "gasCard_custom": "GC900",
        }))
        .unwrap();
        assert_eq!(form.vehicle.as_deref(), Some("ABC123"));
        assert_eq!(form.gas_card.as_deref(), Some("other"));
        assert_eq!(form.gas_card_custom.as_deref(), Some("GC900"));
        assert!(form.mileage.is_none());
    }
}
