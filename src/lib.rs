//! Fabworks API Library
//!
//! Order-to-cash core for a textile print shop: customer orders tracked
//! through production stages, partially consolidated into delivery
//! challans, billed through GST invoices, paid down by payments, and
//! reversed through returns. The crate keeps physical quantity and
//! derived monetary totals conserved across that chain; HTTP routing,
//! authentication, and rendering live in the surrounding API layer.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

// Core modules
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod logging;
pub mod migrator;
pub mod services;

use sea_orm::DatabaseConnection;
use std::sync::Arc;

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: config::AppConfig,
    pub event_sender: events::EventSender,
    pub services: services::AppServices,
}

impl AppState {
    /// Wires the full service graph over an established connection pool.
    pub fn new(
        db: Arc<DatabaseConnection>,
        config: config::AppConfig,
        event_sender: events::EventSender,
    ) -> Self {
        let services = services::AppServices::new(db.clone(), Some(Arc::new(event_sender.clone())));
        Self {
            db,
            config,
            event_sender,
            services,
        }
    }
}
