//! Persistence contract of the lockbox.
//!
//! Checkouts run inside an [`InventoryTx`]: rows fetched through it stay
//! locked until `commit` or `rollback`, and nothing written through it is
//! visible to other transactions before `commit`. Implementations acquire
//! locks in the order vehicle, fuel card, pairs, password queue.

mod memory;
mod postgres;

pub use memory::{InventorySeed, MemoryInventory};
#[cfg(test)]
pub use memory::{SeedFuelCard, SeedVehicle};
pub use postgres::PgInventory;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::model::{AuditEntry, FuelCard, GasCardRecord, PasswordSlot, Vehicle, VehicleRecord};

#[async_trait]
pub trait InventoryStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn InventoryTx>, StoreError>;

    async fn add_password(&self, password: &str) -> Result<PasswordSlot, StoreError>;

    /// Removes and returns the oldest queued password.
    async fn pop_password(&self) -> Result<Option<String>, StoreError>;

    async fn list_vehicles(&self) -> Result<Vec<Vehicle>, StoreError>;

    async fn list_fuel_cards(&self) -> Result<Vec<FuelCard>, StoreError>;

    /// Newest first.
    async fn vehicle_records(
        &self,
        plate: Option<&str>,
        limit: i64,
    ) -> Result<Vec<VehicleRecord>, StoreError>;

    /// Newest first.
    async fn gas_card_records(
        &self,
        card_number: Option<&str>,
        limit: i64,
    ) -> Result<Vec<GasCardRecord>, StoreError>;
}

#[async_trait]
pub trait InventoryTx: Send {
    async fn vehicle_for_update(&mut self, plate: &str) -> Result<Option<Vehicle>, StoreError>;

    async fn fuel_card_for_update(
        &mut self,
        card_number: &str,
    ) -> Result<Option<FuelCard>, StoreError>;

    /// The fuel card most recently taken together with the vehicle.
    async fn paired_fuel_card(&mut self, vehicle_id: i32) -> Result<Option<FuelCard>, StoreError>;

    /// The vehicle most recently taken together with the fuel card.
    async fn paired_vehicle(&mut self, fuel_card_id: i32) -> Result<Option<Vehicle>, StoreError>;

    async fn update_vehicle(&mut self, vehicle: &Vehicle) -> Result<(), StoreError>;

    async fn update_fuel_card(&mut self, card: &FuelCard) -> Result<(), StoreError>;

    /// Replaces any pair either resource belongs to.
    async fn record_pair(&mut self, vehicle_id: i32, fuel_card_id: i32) -> Result<(), StoreError>;

    async fn clear_pairs(
        &mut self,
        vehicle_id: Option<i32>,
        fuel_card_id: Option<i32>,
    ) -> Result<(), StoreError>;

    /// Appends the records and prunes each touched table to `retention`
    /// rows. Applies all of it or none of it; a failure leaves the rest of
    /// the transaction usable.
    async fn append_audit(
        &mut self,
        entries: &[AuditEntry],
        retention: i64,
    ) -> Result<(), StoreError>;

    async fn pop_password(&mut self) -> Result<Option<String>, StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}
