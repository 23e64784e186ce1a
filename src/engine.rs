//! Checkout and return of vehicles and fuel cards.
//!
//! A submission names a vehicle, a fuel card, or both. Each named resource
//! flips between `returned` and `taken`; the whole submission commits as one
//! transaction together with its audit records and exactly one issued
//! lockbox password.

use std::sync::Arc;

use crate::error::{LockError, Resource, ValidationError};
use crate::model::*;
use crate::password;
use crate::store::{InventoryStore, InventoryTx};

/// Selector value that defers to the free-text card number.
pub const OTHER_FUEL_CARD: &str = "other";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Submission {
    pub vehicle_plate: Option<String>,
    pub fuel_card: Option<String>,
    pub mileage: Option<String>,
    pub balance: Option<String>,
}

impl From<LockForm> for Submission {
    fn from(form: LockForm) -> Self {
        let fuel_card = match non_blank(form.gas_card) {
            Some(selector) if selector == OTHER_FUEL_CARD => non_blank(form.gas_card_custom),
            selector => selector,
        };
        Submission {
            vehicle_plate: non_blank(form.vehicle),
            fuel_card,
            mileage: non_blank(form.mileage),
            balance: non_blank(form.balance),
        }
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Balance reported when a fuel card comes back.
pub fn parse_balance(raw: Option<&str>) -> Result<f64, ValidationError> {
    let raw = raw
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .ok_or(ValidationError::BalanceRequired)?;
    let balance: f64 = raw.parse().map_err(|_| ValidationError::InvalidBalance)?;
    if !balance.is_finite() || balance < 0.0 {
        return Err(ValidationError::InvalidBalance);
    }
    Ok(balance)
}

fn toggle_vehicle(mut vehicle: Vehicle, mileage: Option<&str>) -> Vehicle {
    vehicle.status = vehicle.status.toggled();
    if vehicle.status == ResourceStatus::Returned {
        if let Some(mileage) = mileage {
            vehicle.mileage = Some(mileage.to_string());
        }
    }
    vehicle
}

fn toggle_fuel_card(mut card: FuelCard, balance: Option<&str>) -> Result<FuelCard, ValidationError> {
    if card.status.is_taken() {
        card.balance = parse_balance(balance)?;
    }
    card.status = card.status.toggled();
    Ok(card)
}

#[derive(Clone)]
pub struct LockEngine {
    store: Arc<dyn InventoryStore>,
    audit_retention: i64,
}

impl LockEngine {
    pub fn new(store: Arc<dyn InventoryStore>, audit_retention: i64) -> Self {
        Self {
            store,
            audit_retention,
        }
    }

    /// Applies a submission and returns the issued lockbox password.
    ///
    /// `caller` is the authenticated user id; anonymous submissions go
    /// through without audit records.
    pub async fn submit(
        &self,
        submission: Submission,
        caller: Option<i64>,
    ) -> Result<String, LockError> {
        if submission.vehicle_plate.is_none() && submission.fuel_card.is_none() {
            return Err(ValidationError::NoResourceSelected.into());
        }

        let mut tx = self.store.begin().await?;
        match self.apply(tx.as_mut(), &submission, caller).await {
            Ok(password) => {
                tx.commit().await?;
                log::info!(
                    "Lock submission committed (vehicle: {:?}, fuel card: {:?}, caller: {:?})",
                    submission.vehicle_plate,
                    submission.fuel_card,
                    caller
                );
                Ok(password)
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    log::error!("Rollback of lock submission failed: {}", rollback_err);
                }
                Err(err)
            }
        }
    }

    async fn apply(
        &self,
        tx: &mut dyn InventoryTx,
        submission: &Submission,
        caller: Option<i64>,
    ) -> Result<String, LockError> {
        let vehicle = match submission.vehicle_plate.as_deref() {
            Some(plate) => Some(
                tx.vehicle_for_update(plate)
                    .await?
                    .ok_or(LockError::NotFound(Resource::Vehicle))?,
            ),
            None => None,
        };
        let card = match submission.fuel_card.as_deref() {
            Some(card_number) => Some(
                tx.fuel_card_for_update(card_number)
                    .await?
                    .ok_or(LockError::NotFound(Resource::FuelCard))?,
            ),
            None => None,
        };

        check_pairing(tx, vehicle.as_ref(), card.as_ref()).await?;

        let vehicle = vehicle.map(|v| toggle_vehicle(v, submission.mileage.as_deref()));
        let card = card
            .map(|c| toggle_fuel_card(c, submission.balance.as_deref()))
            .transpose()?;

        if let Some(vehicle) = &vehicle {
            tx.update_vehicle(vehicle).await?;
        }
        if let Some(card) = &card {
            tx.update_fuel_card(card).await?;
        }

        match (&vehicle, &card) {
            (Some(v), Some(c)) if v.status.is_taken() && c.status.is_taken() => {
                tx.record_pair(v.id, c.id).await?;
            }
            _ => {
                let returned_vehicle = vehicle.as_ref().filter(|v| !v.status.is_taken()).map(|v| v.id);
                let returned_card = card.as_ref().filter(|c| !c.status.is_taken()).map(|c| c.id);
                if returned_vehicle.is_some() || returned_card.is_some() {
                    tx.clear_pairs(returned_vehicle, returned_card).await?;
                }
            }
        }

        match caller {
            Some(user_id) => {
                let entries: Vec<AuditEntry> = vehicle
                    .iter()
                    .map(|v| AuditEntry {
                        resource: AuditResource::Vehicle(v.id),
                        user_id,
                        action: v.status,
                    })
                    .chain(card.iter().map(|c| AuditEntry {
                        resource: AuditResource::FuelCard(c.id),
                        user_id,
                        action: c.status,
                    }))
                    .collect();
                if let Err(err) = tx.append_audit(&entries, self.audit_retention).await {
                    log::warn!("Audit records dropped for user {}: {}", user_id, err);
                }
            }
            None => log::debug!("Anonymous lock submission, audit records skipped"),
        }

        Ok(password::issue(tx).await?)
    }
}

/// A resource taken together with a partner can only come back with it.
async fn check_pairing(
    tx: &mut dyn InventoryTx,
    vehicle: Option<&Vehicle>,
    card: Option<&FuelCard>,
) -> Result<(), LockError> {
    if let Some(vehicle) = vehicle.filter(|v| v.status.is_taken()) {
        if let Some(partner) = tx.paired_fuel_card(vehicle.id).await? {
            let named = card.map_or(false, |c| c.id == partner.id);
            if partner.status.is_taken() && !named {
                log::info!(
                    "Vehicle {} must be returned together with fuel card {}",
                    vehicle.plate,
                    partner.card_number
                );
                return Err(ValidationError::PairedReturnRequired.into());
            }
        }
    }

    if let Some(card) = card.filter(|c| c.status.is_taken()) {
        if let Some(partner) = tx.paired_vehicle(card.id).await? {
            let named = vehicle.map_or(false, |v| v.id == partner.id);
            if partner.status.is_taken() && !named {
                log::info!(
                    "Fuel card {} must be returned together with vehicle {}",
                    card.card_number,
                    partner.plate
                );
                return Err(ValidationError::PairedReturnRequired.into());
            }
        }
    }

    Ok(())
}
