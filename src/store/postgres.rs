use async_trait::async_trait;
use chrono::NaiveDateTime;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction};
use std::time::Duration;

use super::{InventoryStore, InventoryTx};
use crate::error::StoreError;
use crate::model::*;

const POP_PASSWORD: &str = r#"
    DELETE FROM public.passwords
    WHERE id = (
        SELECT id FROM public.passwords
        ORDER BY id
        LIMIT 1
        FOR UPDATE SKIP LOCKED
    )
    RETURNING password
"#;

#[derive(sqlx::FromRow)]
struct VehicleRow {
    id: i32,
    plate: String,
    status: String,
    mileage: Option<String>,
}

impl From<VehicleRow> for Vehicle {
    fn from(row: VehicleRow) -> Self {
        Vehicle {
            id: row.id,
            plate: row.plate,
            status: ResourceStatus::from_db(&row.status),
            mileage: row.mileage,
        }
    }
}

#[derive(sqlx::FromRow)]
struct FuelCardRow {
    id: i32,
    card_number: String,
    status: String,
    balance: f64,
}

impl From<FuelCardRow> for FuelCard {
    fn from(row: FuelCardRow) -> Self {
        FuelCard {
            id: row.id,
            card_number: row.card_number,
            status: ResourceStatus::from_db(&row.status),
            balance: row.balance,
        }
    }
}

#[derive(sqlx::FromRow)]
struct VehicleRecordRow {
    id: i64,
    vehicle_plate: Option<String>,
    user_id: i64,
    action: String,
    timestamp: NaiveDateTime,
}

#[derive(sqlx::FromRow)]
struct GasCardRecordRow {
    id: i64,
    gas_card_number: Option<String>,
    balance: Option<f64>,
    user_id: i64,
    action: String,
    timestamp: NaiveDateTime,
}

pub struct PgInventory {
    pool: PgPool,
    lock_timeout: Duration,
}

impl PgInventory {
    pub async fn connect(
        database_url: &str,
        max_connections: u32,
        lock_timeout: Duration,
    ) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self::from_pool(pool, lock_timeout))
    }

    pub fn from_pool(pool: PgPool, lock_timeout: Duration) -> Self {
        Self { pool, lock_timeout }
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl InventoryStore for PgInventory {
    async fn begin(&self) -> Result<Box<dyn InventoryTx>, StoreError> {
        let mut tx = self.pool.begin().await.map_err(StoreError::from_sqlx)?;
        sqlx::query("SELECT set_config('lock_timeout', $1, true)")
            .bind(format!("{}ms", self.lock_timeout.as_millis()))
            .execute(&mut *tx)
            .await
            .map_err(StoreError::from_sqlx)?;
        Ok(Box::new(PgTx { tx }))
    }

    async fn add_password(&self, password: &str) -> Result<PasswordSlot, StoreError> {
        let slot = sqlx::query_as::<_, PasswordSlot>(
            r#"
            INSERT INTO public.passwords (password)
            VALUES ($1)
            RETURNING id, password
            "#,
        )
        .bind(password)
        .fetch_one(&self.pool)
        .await?;
        Ok(slot)
    }

    async fn pop_password(&self) -> Result<Option<String>, StoreError> {
        sqlx::query_scalar::<_, String>(POP_PASSWORD)
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::from_sqlx)
    }

    async fn list_vehicles(&self) -> Result<Vec<Vehicle>, StoreError> {
        let rows = sqlx::query_as::<_, VehicleRow>(
            r#"SELECT id, plate, status, mileage FROM public.vehicles ORDER BY id"#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Vehicle::from).collect())
    }

    async fn list_fuel_cards(&self) -> Result<Vec<FuelCard>, StoreError> {
        let rows = sqlx::query_as::<_, FuelCardRow>(
            r#"SELECT id, card_number, status, balance FROM public.gas_cards ORDER BY id"#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(FuelCard::from).collect())
    }

    async fn vehicle_records(
        &self,
        plate: Option<&str>,
        limit: i64,
    ) -> Result<Vec<VehicleRecord>, StoreError> {
        let rows = sqlx::query_as::<_, VehicleRecordRow>(
            r#"
            SELECT rv.id, v.plate AS vehicle_plate, rv.user_id, rv.action, rv."timestamp"
            FROM public.record_vehicles rv
            LEFT JOIN public.vehicles v ON rv.vehicle_id = v.id
            WHERE ($1::TEXT IS NULL OR v.plate = $1)
            ORDER BY rv.id DESC
            LIMIT $2
            "#,
        )
        .bind(plate)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| VehicleRecord {
                id: row.id,
                vehicle_plate: row.vehicle_plate,
                user_id: row.user_id,
                action: ResourceStatus::from_db(&row.action),
                timestamp: row.timestamp,
            })
            .collect())
    }

    async fn gas_card_records(
        &self,
        card_number: Option<&str>,
        limit: i64,
    ) -> Result<Vec<GasCardRecord>, StoreError> {
        let rows = sqlx::query_as::<_, GasCardRecordRow>(
            r#"
            SELECT rg.id, g.card_number AS gas_card_number, g.balance, rg.user_id, rg.action, rg."timestamp"
            FROM public.record_gas_cards rg
            LEFT JOIN public.gas_cards g ON rg.gas_card_id = g.id
            WHERE ($1::TEXT IS NULL OR g.card_number = $1)
            ORDER BY rg.id DESC
            LIMIT $2
            "#,
        )
        .bind(card_number)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| GasCardRecord {
                id: row.id,
                gas_card_number: row.gas_card_number,
                balance: row.balance,
                user_id: row.user_id,
                action: ResourceStatus::from_db(&row.action),
                timestamp: row.timestamp,
            })
            .collect())
    }
}

struct PgTx {
    tx: Transaction<'static, Postgres>,
}

impl PgTx {
    async fn write_audit(&mut self, entries: &[AuditEntry], retention: i64) -> Result<(), StoreError> {
        let mut vehicles_touched = false;
        let mut cards_touched = false;

        for entry in entries {
            match entry.resource {
                AuditResource::Vehicle(vehicle_id) => {
                    vehicles_touched = true;
                    sqlx::query(
                        r#"
                        INSERT INTO public.record_vehicles
                        (vehicle_id, user_id, action, "timestamp")
                        VALUES($1, $2, $3, (now() AT TIME ZONE 'UTC'::text));
                        "#,
                    )
                    .bind(vehicle_id)
                    .bind(entry.user_id)
                    .bind(entry.action.as_str())
                    .execute(&mut *self.tx)
                    .await?;
                }
                AuditResource::FuelCard(gas_card_id) => {
                    cards_touched = true;
                    sqlx::query(
                        r#"
                        INSERT INTO public.record_gas_cards
                        (user_id, gas_card_id, action, "timestamp")
                        VALUES($1, $2, $3, (now() AT TIME ZONE 'UTC'::text));
                        "#,
                    )
                    .bind(entry.user_id)
                    .bind(gas_card_id)
                    .bind(entry.action.as_str())
                    .execute(&mut *self.tx)
                    .await?;
                }
            }
        }

        if vehicles_touched {
            sqlx::query(
                r#"
                DELETE FROM public.record_vehicles
                WHERE id NOT IN (SELECT id FROM public.record_vehicles ORDER BY id DESC LIMIT $1)
                "#,
            )
            .bind(retention)
            .execute(&mut *self.tx)
            .await?;
        }
        if cards_touched {
            sqlx::query(
                r#"
                DELETE FROM public.record_gas_cards
                WHERE id NOT IN (SELECT id FROM public.record_gas_cards ORDER BY id DESC LIMIT $1)
                "#,
            )
            .bind(retention)
            .execute(&mut *self.tx)
            .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl InventoryTx for PgTx {
    async fn vehicle_for_update(&mut self, plate: &str) -> Result<Option<Vehicle>, StoreError> {
        let row = sqlx::query_as::<_, VehicleRow>(
            r#"SELECT id, plate, status, mileage FROM public.vehicles WHERE plate = $1 FOR UPDATE"#,
        )
        .bind(plate)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(StoreError::from_sqlx)?;
        Ok(row.map(Vehicle::from))
    }

    async fn fuel_card_for_update(
        &mut self,
        card_number: &str,
    ) -> Result<Option<FuelCard>, StoreError> {
        let row = sqlx::query_as::<_, FuelCardRow>(
            r#"
            SELECT id, card_number, status, balance
            FROM public.gas_cards
            WHERE card_number = $1
            FOR UPDATE
            "#,
        )
        .bind(card_number)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(StoreError::from_sqlx)?;
        Ok(row.map(FuelCard::from))
    }

    async fn paired_fuel_card(&mut self, vehicle_id: i32) -> Result<Option<FuelCard>, StoreError> {
        let row = sqlx::query_as::<_, FuelCardRow>(
            r#"
            SELECT g.id, g.card_number, g.status, g.balance
            FROM public.checkout_pairs p
            INNER JOIN public.gas_cards g ON p.gas_card_id = g.id
            WHERE p.vehicle_id = $1
            FOR UPDATE OF p
            "#,
        )
        .bind(vehicle_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(StoreError::from_sqlx)?;
        Ok(row.map(FuelCard::from))
    }

    async fn paired_vehicle(&mut self, fuel_card_id: i32) -> Result<Option<Vehicle>, StoreError> {
        let row = sqlx::query_as::<_, VehicleRow>(
            r#"
            SELECT v.id, v.plate, v.status, v.mileage
            FROM public.checkout_pairs p
            INNER JOIN public.vehicles v ON p.vehicle_id = v.id
            WHERE p.gas_card_id = $1
            FOR UPDATE OF p
            "#,
        )
        .bind(fuel_card_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(StoreError::from_sqlx)?;
        Ok(row.map(Vehicle::from))
    }

    async fn update_vehicle(&mut self, vehicle: &Vehicle) -> Result<(), StoreError> {
        sqlx::query(r#"UPDATE public.vehicles SET status = $2, mileage = $3 WHERE id = $1"#)
            .bind(vehicle.id)
            .bind(vehicle.status.as_str())
            .bind(vehicle.mileage.as_deref())
            .execute(&mut *self.tx)
            .await
            .map_err(StoreError::from_sqlx)?;
        Ok(())
    }

    async fn update_fuel_card(&mut self, card: &FuelCard) -> Result<(), StoreError> {
        sqlx::query(r#"UPDATE public.gas_cards SET status = $2, balance = $3 WHERE id = $1"#)
            .bind(card.id)
            .bind(card.status.as_str())
            .bind(card.balance)
            .execute(&mut *self.tx)
            .await
            .map_err(StoreError::from_sqlx)?;
        Ok(())
    }

    async fn record_pair(&mut self, vehicle_id: i32, fuel_card_id: i32) -> Result<(), StoreError> {
        self.clear_pairs(Some(vehicle_id), Some(fuel_card_id)).await?;
        sqlx::query(
            r#"
            INSERT INTO public.checkout_pairs
            (vehicle_id, gas_card_id, taken_at)
            VALUES($1, $2, (now() AT TIME ZONE 'UTC'::text));
            "#,
        )
        .bind(vehicle_id)
        .bind(fuel_card_id)
        .execute(&mut *self.tx)
        .await
        .map_err(StoreError::from_sqlx)?;
        Ok(())
    }

    async fn clear_pairs(
        &mut self,
        vehicle_id: Option<i32>,
        fuel_card_id: Option<i32>,
    ) -> Result<(), StoreError> {
        sqlx::query(r#"DELETE FROM public.checkout_pairs WHERE vehicle_id = $1 OR gas_card_id = $2"#)
            .bind(vehicle_id)
            .bind(fuel_card_id)
            .execute(&mut *self.tx)
            .await
            .map_err(StoreError::from_sqlx)?;
        Ok(())
    }

    async fn append_audit(
        &mut self,
        entries: &[AuditEntry],
        retention: i64,
    ) -> Result<(), StoreError> {
        sqlx::query("SAVEPOINT audit_append")
            .execute(&mut *self.tx)
            .await
            .map_err(StoreError::from_sqlx)?;

        match self.write_audit(entries, retention).await {
            Ok(()) => {
                sqlx::query("RELEASE SAVEPOINT audit_append")
                    .execute(&mut *self.tx)
                    .await
                    .map_err(StoreError::from_sqlx)?;
                Ok(())
            }
            Err(err) => {
                sqlx::query("ROLLBACK TO SAVEPOINT audit_append")
                    .execute(&mut *self.tx)
                    .await
                    .map_err(StoreError::from_sqlx)?;
                Err(err)
            }
        }
    }

    async fn pop_password(&mut self) -> Result<Option<String>, StoreError> {
        sqlx::query_scalar::<_, String>(POP_PASSWORD)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(StoreError::from_sqlx)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let this = *self;
        this.tx.commit().await.map_err(StoreError::from_sqlx)
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        let this = *self;
        this.tx.rollback().await.map_err(StoreError::from_sqlx)
    }
}
