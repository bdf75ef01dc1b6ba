use std::sync::Arc;

use crate::database::transactions::TransactionStore;
use crate::services::mpesa_service::MpesaService;

#[derive(Clone)]
pub struct AppState {
    pub store: TransactionStore,
    pub mpesa: Arc<MpesaService>,
}

impl AppState {
    pub fn new(store: TransactionStore, mpesa: Arc<MpesaService>) -> Self {
        AppState { store, mpesa }
    }
}
