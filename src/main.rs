mod config;
mod engine;
mod error;
mod identity;
mod model;
mod password;
mod store;

use actix_cors::Cors;
use actix_web::middleware::Logger;
use actix_web::{get, post, HttpResponse};
use actix_web::{web, App, HttpServer};
use dotenv::dotenv;
use env_logger;
use std::sync::Arc;

use crate::config::Config;
use crate::engine::LockEngine;
use crate::error::{ApiError, LockError, Resource, SeedError};
use crate::identity::MaybeCaller;
use crate::model::*;
use crate::store::{InventorySeed, InventoryStore, MemoryInventory, PgInventory};

#[get("/")]
async fn index(data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let vehicles = data.store.list_vehicles().await?;
    let gas_cards = data.store.list_fuel_cards().await?;

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "vehicles": vehicles,
        "gas_cards": gas_cards
    })))
}

#[post("/lock/submit")]
async fn submit_lock(
    data: web::Data<AppState>,
    caller: MaybeCaller,
    form: web::Form<LockForm>,
) -> Result<HttpResponse, ApiError> {
    if data.config.require_identity && caller.0.is_none() {
        return Err(ApiError::Unauthorized);
    }

    let password = data
        .engine
        .submit(form.into_inner().into(), caller.user_id())
        .await?;
    Ok(HttpResponse::Ok().json(IssuedPassword { password }))
}

#[post("/lock/password")]
async fn post_password(
    data: web::Data<AppState>,
    caller: MaybeCaller,
    request: web::Json<PostPassword>,
) -> Result<HttpResponse, ApiError> {
    caller.require_admin()?;
    let code = password::normalize(&request.password)?;
    let slot = data.store.add_password(code).await?;
    log::info!("Password slot {} queued", slot.id);

    Ok(HttpResponse::Created().json(slot))
}

#[post("/lock/password/take")]
async fn take_password(
    data: web::Data<AppState>,
    caller: MaybeCaller,
) -> Result<HttpResponse, ApiError> {
    caller.require_admin()?;
    pop_queued_password(&data).await
}

#[post("/lock/retrieve")]
async fn retrieve_password(
    data: web::Data<AppState>,
    caller: MaybeCaller,
) -> Result<HttpResponse, ApiError> {
    caller.require_verified()?;
    pop_queued_password(&data).await
}

async fn pop_queued_password(data: &AppState) -> Result<HttpResponse, ApiError> {
    match data.store.pop_password().await? {
        Some(password) => Ok(HttpResponse::Ok().json(IssuedPassword { password })),
        None => Err(LockError::NotFound(Resource::Password).into()),
    }
}

#[get("/record/vehicle")]
async fn get_vehicle_records(
    data: web::Data<AppState>,
    query: web::Query<VehicleRecordQuery>,
) -> Result<HttpResponse, ApiError> {
    let plate = query.plate.as_deref().map(str::trim).filter(|p| !p.is_empty());
    let records = data
        .store
        .vehicle_records(plate, data.config.audit_retention)
        .await?;

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "rows": records.len(),
        "records": records
    })))
}

#[get("/record/gas")]
async fn get_gas_card_records(
    data: web::Data<AppState>,
    query: web::Query<GasCardRecordQuery>,
) -> Result<HttpResponse, ApiError> {
    let card = query.card.as_deref().map(str::trim).filter(|c| !c.is_empty());
    let records = data
        .store
        .gas_card_records(card, data.config.audit_retention)
        .await?;

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "rows": records.len(),
        "records": records
    })))
}

pub struct AppState {
    config: Config,
    store: Arc<dyn InventoryStore>,
    engine: LockEngine,
}

impl AppState {
    fn new(config: Config, store: Arc<dyn InventoryStore>) -> Self {
        let engine = LockEngine::new(store.clone(), config.audit_retention);
        Self {
            config,
            store,
            engine,
        }
    }
}

fn routes(cfg: &mut web::ServiceConfig) {
    // Undecodable bodies and query strings answer with the JSON error shape.
    cfg.app_data(web::FormConfig::default().error_handler(|err, _req| {
        ApiError::Malformed(err.to_string()).into()
    }))
    .app_data(web::JsonConfig::default().error_handler(|err, _req| {
        ApiError::Malformed(err.to_string()).into()
    }))
    .app_data(web::QueryConfig::default().error_handler(|err, _req| {
        ApiError::Malformed(err.to_string()).into()
    }))
    .service(index)
        .service(submit_lock)
        .service(post_password)
        .service(take_password)
        .service(retrieve_password)
        .service(get_vehicle_records)
        .service(get_gas_card_records);
}

fn load_seed(config: &Config) -> Result<InventorySeed, SeedError> {
    match &config.inventory_seed {
        Some(path) => InventorySeed::from_file(path),
        None => Ok(InventorySeed::default()),
    }
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv().ok();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            log::error!("🔥 Invalid configuration: {}", err);
            std::process::exit(1);
        }
    };

    let store: Arc<dyn InventoryStore> = match &config.database_url {
        Some(database_url) => {
            let store = match PgInventory::connect(
                database_url,
                config.db_max_connections,
                config.lock_timeout,
            )
            .await
            {
                Ok(store) => {
                    log::info!("✅Connection to the database is successful!");
                    store
                }
                Err(err) => {
                    log::error!("🔥 Failed to connect to the database: {:?}", err);
                    std::process::exit(1);
                }
            };
            if let Err(err) = store.migrate().await {
                log::error!("🔥 Failed to migrate the database: {}", err);
                std::process::exit(1);
            }
            Arc::new(store)
        }
        None => {
            let seed = match load_seed(&config) {
                Ok(seed) => seed,
                Err(err) => {
                    log::error!("🔥 Failed to load inventory seed: {}", err);
                    std::process::exit(1);
                }
            };
            log::warn!("DATABASE_URL not set, keeping the inventory in memory");
            Arc::new(MemoryInventory::new(seed, config.lock_timeout))
        }
    };

    let bind = (config.http_host.clone(), config.http_port);
    let state = web::Data::new(AppState::new(config, store));

    log::info!("🚀 Server started successfully");

    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .wrap(
                Cors::default()
                    .allow_any_origin()
                    .allow_any_header()
                    .allow_any_method()
                    .supports_credentials(),
            )
            .wrap(Logger::default())
            .configure(routes)
    })
    .bind(bind)?
    .run()
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{ADMIN_HEADER, USER_ID_HEADER, VERIFIED_HEADER};
    use crate::store::{InventoryTx, SeedFuelCard, SeedVehicle};
    use actix_web::http::StatusCode;
    use actix_web::test;
    use std::time::Duration;

    fn test_state(passwords: &[&str], require_identity: bool) -> (web::Data<AppState>, MemoryInventory) {
        let mut config = Config::from_lookup(|name| match name {
            "HTTP_PORT" => Some("8080".to_string()),
            _ => None,
        })
        .unwrap();
        config.require_identity = require_identity;

        let store = MemoryInventory::new(
            InventorySeed {
                vehicles: vec![SeedVehicle {
                    plate: "ABC123".to_string(),
                    mileage: Some("1000".to_string()),
                }],
                gas_cards: vec![SeedFuelCard {
                    card_number: "GC100".to_string(),
                    balance: 0.0,
                }],
                passwords: passwords.iter().map(|p| p.to_string()).collect(),
            },
            Duration::from_millis(200),
        );
        let data = web::Data::new(AppState::new(config, Arc::new(store.clone())));
        (data, store)
    }

    fn submit(form: &[(&str, &str)]) -> test::TestRequest {
        let body: Vec<(String, String)> = form
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        test::TestRequest::post()
            .uri("/lock/submit")
            .insert_header((USER_ID_HEADER, "7"))
            .insert_header((VERIFIED_HEADER, "1"))
            .set_form(body)
    }

    #[actix_web::test]
    async fn checkout_and_paired_return_over_http() {
        let (data, store) = test_state(&["P1", "P2"], false);
        let app = test::init_service(App::new().app_data(data).configure(routes)).await;

        let resp = test::call_service(&app, submit(&[("vehicle", "ABC123"), ("gasCard", "GC100")]).to_request()).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let issued: IssuedPassword = test::read_body_json(resp).await;
        assert_eq!(issued.password, "P1");

        let resp = test::call_service(&app, submit(&[("vehicle", "ABC123"), ("mileage", "1200")]).to_request()).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["error"], "validation_error");
        assert_eq!(body["message"], "paired return required");

        let resp = test::call_service(
            &app,
            submit(&[
                ("vehicle", "ABC123"),
                ("gasCard", "GC100"),
                ("mileage", "1300"),
                ("balance", "50"),
            ])
            .to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);
        let issued: IssuedPassword = test::read_body_json(resp).await;
        assert_eq!(issued.password, "P2");

        let vehicles = store.list_vehicles().await.unwrap();
        assert_eq!(vehicles[0].status, ResourceStatus::Returned);
        assert_eq!(vehicles[0].mileage.as_deref(), Some("1300"));
        let cards = store.list_fuel_cards().await.unwrap();
        assert_eq!(cards[0].balance, 50.0);
    }

    #[actix_web::test]
    async fn custom_card_selector_and_missing_resources() {
        let (data, _) = test_state(&[], false);
        let app = test::init_service(App::new().app_data(data).configure(routes)).await;

        let resp = test::call_service(
            &app,
            submit(&[("gasCard", "other"), ("gasCard_custom", "GC100")]).to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = test::call_service(&app, submit(&[("vehicle", "NOPE")]).to_request()).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["message"], "vehicle not found");

        let resp = test::call_service(&app, submit(&[("vehicle", "")]).to_request()).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn anonymous_submissions_follow_the_identity_policy() {
        let (data, _) = test_state(&[], true);
        let app = test::init_service(App::new().app_data(data).configure(routes)).await;
        let req = test::TestRequest::post()
            .uri("/lock/submit")
            .set_form([("vehicle", "ABC123")])
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::UNAUTHORIZED);

        let (data, store) = test_state(&[], false);
        let app = test::init_service(App::new().app_data(data).configure(routes)).await;
        let req = test::TestRequest::post()
            .uri("/lock/submit")
            .set_form([("vehicle", "ABC123")])
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);
        assert!(store.vehicle_records(None, 200).await.unwrap().is_empty());
    }

    #[actix_web::test]
    async fn password_pool_is_administered_by_admins() {
        let (data, _) = test_state(&[], false);
        let app = test::init_service(App::new().app_data(data).configure(routes)).await;

        let req = test::TestRequest::post()
            .uri("/lock/password")
            .insert_header((USER_ID_HEADER, "7"))
            .set_json(serde_json::json!({ "password": "4821" }))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::FORBIDDEN);

        for code in ["4821", "9034"] {
            let req = test::TestRequest::post()
                .uri("/lock/password")
                .insert_header((USER_ID_HEADER, "1"))
                .insert_header((ADMIN_HEADER, "1"))
                .set_json(serde_json::json!({ "password": code }))
                .to_request();
            assert_eq!(test::call_service(&app, req).await.status(), StatusCode::CREATED);
        }

        let req = test::TestRequest::post()
            .uri("/lock/password/take")
            .insert_header((USER_ID_HEADER, "1"))
            .insert_header((ADMIN_HEADER, "1"))
            .to_request();
        let issued: IssuedPassword = test::call_and_read_body_json(&app, req).await;
        assert_eq!(issued.password, "4821");

        let req = test::TestRequest::post()
            .uri("/lock/retrieve")
            .insert_header((USER_ID_HEADER, "7"))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::FORBIDDEN);

        let req = test::TestRequest::post()
            .uri("/lock/retrieve")
            .insert_header((USER_ID_HEADER, "7"))
            .insert_header((VERIFIED_HEADER, "1"))
            .to_request();
        let issued: IssuedPassword = test::call_and_read_body_json(&app, req).await;
        assert_eq!(issued.password, "9034");

        let req = test::TestRequest::post()
            .uri("/lock/retrieve")
            .insert_header((USER_ID_HEADER, "7"))
            .insert_header((VERIFIED_HEADER, "1"))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);
    }

    #[actix_web::test]
    async fn blank_passwords_are_rejected() {
        let (data, _) = test_state(&[], false);
        let app = test::init_service(App::new().app_data(data).configure(routes)).await;
        let req = test::TestRequest::post()
            .uri("/lock/password")
            .insert_header((USER_ID_HEADER, "1"))
            .insert_header((ADMIN_HEADER, "1"))
            .set_json(serde_json::json!({ "password": "   " }))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn inventory_and_records_are_listed() {
        let (data, _) = test_state(&[], false);
        let app = test::init_service(App::new().app_data(data).configure(routes)).await;

        test::call_service(&app, submit(&[("vehicle", "ABC123"), ("gasCard", "GC100")]).to_request()).await;

        let req = test::TestRequest::get().uri("/").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["vehicles"][0]["plate"], "ABC123");
        assert_eq!(body["vehicles"][0]["status"], "taken");
        assert_eq!(body["gas_cards"][0]["status"], "taken");

        let req = test::TestRequest::get().uri("/record/vehicle?plate=ABC123").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["rows"], 1);
        assert_eq!(body["records"][0]["action"], "taken");
        assert_eq!(body["records"][0]["user_id"], 7);

        let req = test::TestRequest::get().uri("/record/gas?card=GC999").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["rows"], 0);
    }

    #[actix_web::test]
    async fn undecodable_bodies_get_the_json_error_shape() {
        let (data, _) = test_state(&[], false);
        let app = test::init_service(App::new().app_data(data).configure(routes)).await;

        let req = test::TestRequest::post()
            .uri("/lock/submit")
            .insert_header((USER_ID_HEADER, "7"))
            .set_json(serde_json::json!({ "vehicle": "ABC123" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["error"], "validation_error");

        let req = test::TestRequest::post()
            .uri("/lock/password")
            .insert_header((USER_ID_HEADER, "1"))
            .insert_header((ADMIN_HEADER, "1"))
            .insert_header(("content-type", "application/json"))
            .set_payload("{not json")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["error"], "validation_error");
        assert!(body["message"].as_str().unwrap().starts_with("malformed request"));
    }

    #[actix_web::test]
    async fn record_queries_report_store_failures_as_json() {
        let (data, store) = test_state(&[], false);
        let app = test::init_service(App::new().app_data(data).configure(routes)).await;

        // Holding a transaction keeps the inventory lock past its timeout.
        let tx = store.begin().await.unwrap();
        for uri in ["/record/vehicle", "/record/gas"] {
            let req = test::TestRequest::get().uri(uri).to_request();
            let resp = test::call_service(&app, req).await;
            assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
            let body: serde_json::Value = test::read_body_json(resp).await;
            assert_eq!(body["error"], "internal_error");
            assert_eq!(body["message"], "Internal Server Error");
        }
        tx.rollback().await.unwrap();

        let req = test::TestRequest::get().uri("/record/vehicle").to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);
    }

    #[::core::prelude::v1::test]
    fn seed_defaults_to_empty_and_reports_missing_files() {
        let mut config = Config::from_lookup(|name| match name {
            "HTTP_PORT" => Some("8080".to_string()),
            _ => None,
        })
        .unwrap();
        assert!(load_seed(&config).unwrap().vehicles.is_empty());

        config.inventory_seed = Some(std::path::PathBuf::from("/nonexistent/seed.json"));
        assert!(matches!(load_seed(&config), Err(SeedError::Io(_))));
    }
}
