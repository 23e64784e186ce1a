use async_trait::async_trait;
use chrono::{NaiveDateTime, Utc};
use serde::Deserialize;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::{InventoryStore, InventoryTx};
use crate::error::{SeedError, StoreError};
use crate::model::*;

/// Initial contents of an in-memory inventory, loadable from JSON.
#[derive(Debug, Default, Deserialize)]
pub struct InventorySeed {
    #[serde(default)]
    pub vehicles: Vec<SeedVehicle>,
    #[serde(default)]
    pub gas_cards: Vec<SeedFuelCard>,
    #[serde(default)]
    pub passwords: Vec<String>,
}

impl InventorySeed {
    pub fn from_file(path: &Path) -> Result<Self, SeedError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }
}

#[derive(Debug, Deserialize)]
pub struct SeedVehicle {
    pub plate: String,
    #[serde(default)]
    pub mileage: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SeedFuelCard {
    pub card_number: String,
    #[serde(default)]
    pub balance: f64,
}

#[derive(Debug, Clone)]
struct StoredRecord {
    id: i64,
    resource_id: i32,
    user_id: i64,
    action: ResourceStatus,
    timestamp: NaiveDateTime,
}

#[derive(Debug, Clone, Default)]
struct Inventory {
    vehicles: Vec<Vehicle>,
    fuel_cards: Vec<FuelCard>,
    passwords: VecDeque<PasswordSlot>,
    vehicle_records: Vec<StoredRecord>,
    gas_card_records: Vec<StoredRecord>,
    // (vehicle id, fuel card id)
    pairs: Vec<(i32, i32)>,
    next_password_id: i32,
    next_vehicle_record_id: i64,
    next_gas_card_record_id: i64,
}

impl Inventory {
    fn from_seed(seed: InventorySeed) -> Self {
        let mut inventory = Inventory::default();
        for (index, vehicle) in seed.vehicles.into_iter().enumerate() {
            inventory.vehicles.push(Vehicle {
                id: index as i32 + 1,
                plate: vehicle.plate,
                status: ResourceStatus::Returned,
                mileage: vehicle.mileage,
            });
        }
        for (index, card) in seed.gas_cards.into_iter().enumerate() {
            inventory.fuel_cards.push(FuelCard {
                id: index as i32 + 1,
                card_number: card.card_number,
                status: ResourceStatus::Returned,
                balance: card.balance,
            });
        }
        for password in seed.passwords {
            inventory.push_password(password);
        }
        inventory
    }

    fn push_password(&mut self, password: String) -> PasswordSlot {
        self.next_password_id += 1;
        let slot = PasswordSlot {
            id: self.next_password_id,
            password,
        };
        self.passwords.push_back(slot.clone());
        slot
    }

    fn vehicle(&self, id: i32) -> Option<&Vehicle> {
        self.vehicles.iter().find(|v| v.id == id)
    }

    fn fuel_card(&self, id: i32) -> Option<&FuelCard> {
        self.fuel_cards.iter().find(|c| c.id == id)
    }

    fn append_audit(&mut self, entries: &[AuditEntry], retention: i64) -> Result<(), StoreError> {
        for entry in entries {
            let known = match entry.resource {
                AuditResource::Vehicle(id) => self.vehicle(id).is_some(),
                AuditResource::FuelCard(id) => self.fuel_card(id).is_some(),
            };
            if !known {
                return Err(StoreError::Audit(format!("unknown resource {:?}", entry.resource)));
            }
        }

        let timestamp = Utc::now().naive_utc();
        for entry in entries {
            let (records, next_id, resource_id) = match entry.resource {
                AuditResource::Vehicle(id) => {
                    (&mut self.vehicle_records, &mut self.next_vehicle_record_id, id)
                }
                AuditResource::FuelCard(id) => {
                    (&mut self.gas_card_records, &mut self.next_gas_card_record_id, id)
                }
            };
            *next_id += 1;
            records.push(StoredRecord {
                id: *next_id,
                resource_id,
                user_id: entry.user_id,
                action: entry.action,
                timestamp,
            });
        }

        let keep = usize::try_from(retention).unwrap_or(0);
        for records in [&mut self.vehicle_records, &mut self.gas_card_records] {
            if records.len() > keep {
                let excess = records.len() - keep;
                records.drain(..excess);
            }
        }
        Ok(())
    }
}

/// Inventory kept in process memory behind a single lock. Used when no
/// database is configured.
#[derive(Clone)]
pub struct MemoryInventory {
    state: Arc<Mutex<Inventory>>,
    lock_timeout: Duration,
}

impl MemoryInventory {
    pub fn new(seed: InventorySeed, lock_timeout: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(Inventory::from_seed(seed))),
            lock_timeout,
        }
    }

    async fn lock(&self) -> Result<OwnedMutexGuard<Inventory>, StoreError> {
        tokio::time::timeout(self.lock_timeout, self.state.clone().lock_owned())
            .await
            .map_err(|_| StoreError::LockTimeout)
    }
}

#[async_trait]
impl InventoryStore for MemoryInventory {
    async fn begin(&self) -> Result<Box<dyn InventoryTx>, StoreError> {
        let guard = self.lock().await?;
        let staged = guard.clone();
        Ok(Box::new(MemoryTx { guard, staged }))
    }

    async fn add_password(&self, password: &str) -> Result<PasswordSlot, StoreError> {
        let mut inventory = self.lock().await?;
        Ok(inventory.push_password(password.to_string()))
    }

    async fn pop_password(&self) -> Result<Option<String>, StoreError> {
        let mut inventory = self.lock().await?;
        Ok(inventory.passwords.pop_front().map(|slot| slot.password))
    }

    async fn list_vehicles(&self) -> Result<Vec<Vehicle>, StoreError> {
        Ok(self.lock().await?.vehicles.clone())
    }

    async fn list_fuel_cards(&self) -> Result<Vec<FuelCard>, StoreError> {
        Ok(self.lock().await?.fuel_cards.clone())
    }

    async fn vehicle_records(
        &self,
        plate: Option<&str>,
        limit: i64,
    ) -> Result<Vec<VehicleRecord>, StoreError> {
        let inventory = self.lock().await?;
        Ok(inventory
            .vehicle_records
            .iter()
            .rev()
            .map(|record| VehicleRecord {
                id: record.id,
                vehicle_plate: inventory.vehicle(record.resource_id).map(|v| v.plate.clone()),
                user_id: record.user_id,
                action: record.action,
                timestamp: record.timestamp,
            })
            .filter(|record| plate.map_or(true, |p| record.vehicle_plate.as_deref() == Some(p)))
            .take(usize::try_from(limit).unwrap_or(0))
            .collect())
    }

    async fn gas_card_records(
        &self,
        card_number: Option<&str>,
        limit: i64,
    ) -> Result<Vec<GasCardRecord>, StoreError> {
        let inventory = self.lock().await?;
        Ok(inventory
            .gas_card_records
            .iter()
            .rev()
            .map(|record| {
                let card = inventory.fuel_card(record.resource_id);
                GasCardRecord {
                    id: record.id,
                    gas_card_number: card.map(|c| c.card_number.clone()),
                    balance: card.map(|c| c.balance),
                    user_id: record.user_id,
                    action: record.action,
                    timestamp: record.timestamp,
                }
            })
            .filter(|record| {
                card_number.map_or(true, |n| record.gas_card_number.as_deref() == Some(n))
            })
            .take(usize::try_from(limit).unwrap_or(0))
            .collect())
    }
}

/// Holds the inventory lock for its whole lifetime and publishes the staged
/// copy on commit.
struct MemoryTx {
    guard: OwnedMutexGuard<Inventory>,
    staged: Inventory,
}

#[async_trait]
impl InventoryTx for MemoryTx {
    async fn vehicle_for_update(&mut self, plate: &str) -> Result<Option<Vehicle>, StoreError> {
        Ok(self.staged.vehicles.iter().find(|v| v.plate == plate).cloned())
    }

    async fn fuel_card_for_update(
        &mut self,
        card_number: &str,
    ) -> Result<Option<FuelCard>, StoreError> {
        Ok(self
            .staged
            .fuel_cards
            .iter()
            .find(|c| c.card_number == card_number)
            .cloned())
    }

    async fn paired_fuel_card(&mut self, vehicle_id: i32) -> Result<Option<FuelCard>, StoreError> {
        Ok(self
            .staged
            .pairs
            .iter()
            .find(|(v, _)| *v == vehicle_id)
            .and_then(|(_, c)| self.staged.fuel_card(*c))
            .cloned())
    }

    async fn paired_vehicle(&mut self, fuel_card_id: i32) -> Result<Option<Vehicle>, StoreError> {
        Ok(self
            .staged
            .pairs
            .iter()
            .find(|(_, c)| *c == fuel_card_id)
            .and_then(|(v, _)| self.staged.vehicle(*v))
            .cloned())
    }

    async fn update_vehicle(&mut self, vehicle: &Vehicle) -> Result<(), StoreError> {
        if let Some(stored) = self.staged.vehicles.iter_mut().find(|v| v.id == vehicle.id) {
            *stored = vehicle.clone();
        }
        Ok(())
    }

    async fn update_fuel_card(&mut self, card: &FuelCard) -> Result<(), StoreError> {
        if let Some(stored) = self.staged.fuel_cards.iter_mut().find(|c| c.id == card.id) {
            *stored = card.clone();
        }
        Ok(())
    }

    async fn record_pair(&mut self, vehicle_id: i32, fuel_card_id: i32) -> Result<(), StoreError> {
        self.clear_pairs(Some(vehicle_id), Some(fuel_card_id)).await?;
        self.staged.pairs.push((vehicle_id, fuel_card_id));
        Ok(())
    }

    async fn clear_pairs(
        &mut self,
        vehicle_id: Option<i32>,
        fuel_card_id: Option<i32>,
    ) -> Result<(), StoreError> {
        self.staged
            .pairs
            .retain(|(v, c)| Some(*v) != vehicle_id && Some(*c) != fuel_card_id);
        Ok(())
    }

    async fn append_audit(
        &mut self,
        entries: &[AuditEntry],
        retention: i64,
    ) -> Result<(), StoreError> {
        self.staged.append_audit(entries, retention)
    }

    async fn pop_password(&mut self) -> Result<Option<String>, StoreError> {
        Ok(self.staged.passwords.pop_front().map(|slot| slot.password))
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let MemoryTx { mut guard, staged } = *self;
        *guard = staged;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        Ok(())
    }
}
