#![allow(dead_code)]

use std::sync::Arc;

use fabworks_api::{
    db::{self, DbConfig, DbPool},
    entities::{
        customer,
        order_item::{self, MaterialType, ProductionStage},
    },
    events,
    services::{
        customers::CreateCustomerRequest,
        orders::{CreateOrderItemRequest, CreateOrderRequest, OrderWithItems},
        AppServices,
    },
};
use rust_decimal::Decimal;
use uuid::Uuid;

/// Test harness over an in-memory SQLite database.
///
/// The pool is pinned to a single connection so every operation shares
/// the same in-memory database; the embedded migrator builds the schema
/// fresh for each test.
pub struct TestContext {
    pub db: Arc<DbPool>,
    pub services: AppServices,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestContext {
    pub async fn new() -> Self {
        let cfg = DbConfig {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
            min_connections: 1,
            ..Default::default()
        };

        let pool = db::establish_connection_with_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool).await.expect("migrations failed");

        let (event_sender, event_rx) = events::event_channel(64);
        let event_task = events::spawn_event_logger(event_rx);

        let db = Arc::new(pool);
        let services = AppServices::new(db.clone(), Some(Arc::new(event_sender)));

        Self {
            db,
            services,
            _event_task: event_task,
        }
    }

    /// Seeds a customer with unique contact details.
    pub async fn seed_customer(&self) -> customer::Model {
        let tag = Uuid::new_v4().simple().to_string();
        self.services
            .customers
            .create_customer(CreateCustomerRequest {
                name: "Meera Textiles".to_string(),
                phone: format!("98{}", &tag[..8]),
                email: format!("meera+{}@example.com", &tag[..8]),
                address: Some("14 Loom Street, Surat".to_string()),
                gstin: None,
            })
            .await
            .expect("seed customer")
    }

    /// Seeds an order with the given (material, quantity, unit_price)
    /// lines for the customer.
    pub async fn seed_order(
        &self,
        customer_id: Uuid,
        lines: &[(MaterialType, i32, Decimal)],
    ) -> OrderWithItems {
        let items = lines
            .iter()
            .map(|(material, quantity, price)| CreateOrderItemRequest {
                material_type: material.clone(),
                description: None,
                quantity: *quantity,
                unit_price: *price,
            })
            .collect();

        self.services
            .orders
            .create_order(CreateOrderRequest {
                customer_id,
                items,
                notes: None,
            })
            .await
            .expect("seed order")
    }

    /// Walks an order item through printing into post_process.
    pub async fn finish_production(&self, order_item_id: Uuid) -> order_item::Model {
        self.services
            .production
            .advance_stage(order_item_id, ProductionStage::Printing)
            .await
            .expect("advance to printing");
        self.services
            .production
            .advance_stage(order_item_id, ProductionStage::PostProcess)
            .await
            .expect("advance to post_process")
    }
}
