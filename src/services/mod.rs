pub mod audit;
pub mod billing;
pub mod challans;
pub mod customers;
pub mod invoicing;
pub mod numbering;
pub mod orders;
pub mod payments;
pub mod production;
pub mod quantity_ledger;
pub mod returns;

use crate::{db::DbPool, events::EventSender};
use std::sync::Arc;

/// All services wired over one pool and event channel, ready for the
/// surrounding API layer to consume.
#[derive(Clone)]
pub struct AppServices {
    pub customers: Arc<customers::CustomerService>,
    pub orders: Arc<orders::OrderService>,
    pub production: Arc<production::ProductionService>,
    pub challans: Arc<challans::ChallanService>,
    pub invoicing: Arc<invoicing::InvoiceService>,
    pub payments: Arc<payments::PaymentService>,
    pub returns: Arc<returns::ReturnService>,
    pub audit: Arc<audit::AuditService>,
}

impl AppServices {
    pub fn new(db_pool: Arc<DbPool>, event_sender: Option<Arc<EventSender>>) -> Self {
        Self {
            customers: Arc::new(customers::CustomerService::new(
                db_pool.clone(),
                event_sender.clone(),
            )),
            orders: Arc::new(orders::OrderService::new(
                db_pool.clone(),
                event_sender.clone(),
            )),
            production: Arc::new(production::ProductionService::new(
                db_pool.clone(),
                event_sender.clone(),
            )),
            challans: Arc::new(challans::ChallanService::new(
                db_pool.clone(),
                event_sender.clone(),
            )),
            invoicing: Arc::new(invoicing::InvoiceService::new(
                db_pool.clone(),
                event_sender.clone(),
            )),
            payments: Arc::new(payments::PaymentService::new(
                db_pool.clone(),
                event_sender.clone(),
            )),
            returns: Arc::new(returns::ReturnService::new(
                db_pool.clone(),
                event_sender,
            )),
            audit: Arc::new(audit::AuditService::new(db_pool)),
        }
    }
}
