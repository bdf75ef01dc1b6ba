use axum::{
    routing::{get, post},
    Router,
};

use crate::handlers::mpesa_handlers;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/stkpush", post(mpesa_handlers::initiate_stk_push))
        .route("/callback", post(mpesa_handlers::mpesa_callback))
        .route("/status/:transaction_id", get(mpesa_handlers::transaction_status))
        .route("/last-transaction", get(mpesa_handlers::last_transaction))
}
