// handlers/mpesa_handlers.rs
use axum::{
    body::Bytes,
    extract::{Json, Path, State},
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::errors::{AppError, GatewayError};
use crate::models::callback::{parse_callback, ParsedCallback};
use crate::models::transaction::{PollStatus, TxOutcome, TxStatus};
use crate::state::AppState;

// Both fields optional at the serde layer so presence is checked here and
// reported through the structured body, not as a framework rejection.
#[derive(Debug, Deserialize)]
pub struct ChargeRequest {
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub amount: Option<i64>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum ChargeResponse {
    Accepted {
        #[serde(rename = "transactionId")]
        transaction_id: String,
        status: TxStatus,
    },
    Error(ChargeErrorBody),
}

#[derive(Debug, Serialize)]
pub struct ChargeErrorBody {
    pub status: ErrorTag,
    pub code: ErrorCode,
    pub message: String,
    pub safe: bool,
    pub action: ClientAction,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub enum ErrorTag {
    #[serde(rename = "ERROR")]
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidInput,
    NetworkDelay,
    DarajaRateLimit,
    ServiceTemporaryDown,
}

/// Advisory next step for the device that sent the charge: fix the input and
/// resubmit, or wait out a gateway condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ClientAction {
    Reenter,
    Wait,
}

impl ChargeErrorBody {
    fn invalid_input(message: impl Into<String>) -> Self {
        ChargeErrorBody {
            status: ErrorTag::Error,
            code: ErrorCode::InvalidInput,
            message: message.into(),
            safe: true,
            action: ClientAction::Reenter,
        }
    }

    fn from_gateway(err: &GatewayError) -> Self {
        let (code, message, action) = match err {
            GatewayError::InvalidInput(msg) => {
                (ErrorCode::InvalidInput, msg.clone(), ClientAction::Reenter)
            }
            GatewayError::RateLimited => (
                ErrorCode::DarajaRateLimit,
                "Too many payment requests right now. Please wait a moment and try again."
                    .to_string(),
                ClientAction::Wait,
            ),
            GatewayError::Unavailable(_) | GatewayError::AuthFailure(_) => (
                ErrorCode::ServiceTemporaryDown,
                "The payment service is temporarily down. Please try again shortly.".to_string(),
                ClientAction::Wait,
            ),
            GatewayError::NetworkDelay(_) => (
                ErrorCode::NetworkDelay,
                "The payment network is slow. Please wait and then try again.".to_string(),
                ClientAction::Wait,
            ),
        };

        ChargeErrorBody {
            status: ErrorTag::Error,
            code,
            message,
            safe: true,
            action,
        }
    }
}

fn validate_charge(request: &ChargeRequest) -> Result<(&str, i64), String> {
    let phone = match request.phone.as_deref() {
        Some(p) if !p.trim().is_empty() => p,
        _ => return Err("Phone number is required".to_string()),
    };
    let amount = match request.amount {
        Some(a) if a > 0 => a,
        Some(_) => return Err("Amount must be a positive integer".to_string()),
        None => return Err("Amount is required".to_string()),
    };
    Ok((phone, amount))
}

/// Initiate a charge. The response is always HTTP 200 with an embedded
/// outcome so constrained client devices parse one body shape instead of
/// branching on status codes; only an insert failure surfaces an error
/// status.
pub async fn initiate_stk_push(
    State(state): State<AppState>,
    Json(request): Json<ChargeRequest>,
) -> Result<Json<ChargeResponse>, AppError> {
    let (phone, amount) = match validate_charge(&request) {
        Ok(pair) => pair,
        Err(message) => {
            info!("Rejected charge request: {}", message);
            return Ok(Json(ChargeResponse::Error(ChargeErrorBody::invalid_input(
                message,
            ))));
        }
    };

    let transaction_id = match state.mpesa.submit_charge(phone, amount).await {
        Ok(id) => id,
        Err(err) => {
            error!("STK push failed: {}", err);
            return Ok(Json(ChargeResponse::Error(ChargeErrorBody::from_gateway(
                &err,
            ))));
        }
    };

    state.store.create_pending(&transaction_id, phone, amount).await?;

    info!("Charge pending: {}", transaction_id);
    Ok(Json(ChargeResponse::Accepted {
        transaction_id,
        status: TxStatus::Pending,
    }))
}

#[derive(Debug, Serialize)]
pub struct CallbackAck {
    #[serde(rename = "ResultCode")]
    pub result_code: i32,
    #[serde(rename = "ResultDesc")]
    pub result_desc: &'static str,
}

impl CallbackAck {
    fn accepted() -> Self {
        CallbackAck {
            result_code: 0,
            result_desc: "Accepted",
        }
    }

    fn invalid() -> Self {
        CallbackAck {
            result_code: 0,
            result_desc: "Invalid callback payload",
        }
    }
}

/// Gateway-originated result delivery. Deliveries are not signed, so any
/// caller able to reach this endpoint can forge an outcome; a known gap.
/// The gateway only cares that the endpoint answered, so every path here
/// acknowledges with 200 regardless of what happened internally.
pub async fn mpesa_callback(State(state): State<AppState>, body: Bytes) -> Json<CallbackAck> {
    let callback = match parse_callback(&body) {
        ParsedCallback::Valid(cb) => cb,
        ParsedCallback::Malformed => {
            warn!("Discarding malformed callback payload");
            return Json(CallbackAck::invalid());
        }
    };

    info!(
        "Callback for {}: ResultCode={}",
        callback.checkout_request_id, callback.result_code
    );

    let outcome = if callback.result_code == 0 {
        TxOutcome::Success {
            receipt: callback.receipt_number(),
        }
    } else {
        TxOutcome::Failed
    };

    match state
        .store
        .mark_result(&callback.checkout_request_id, outcome)
        .await
    {
        Ok(true) => {}
        Ok(false) => warn!(
            "Callback for unknown transaction {}",
            callback.checkout_request_id
        ),
        Err(err) => error!(
            "Failed to record callback for {}: {}",
            callback.checkout_request_id, err
        ),
    }

    Json(CallbackAck::accepted())
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: PollStatus,
}

pub async fn transaction_status(
    State(state): State<AppState>,
    Path(transaction_id): Path<String>,
) -> Result<Json<StatusResponse>, AppError> {
    let status = state.store.get_status(&transaction_id).await?;
    Ok(Json(StatusResponse {
        status: PollStatus::from(status),
    }))
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum LastTransactionResponse {
    Present {
        transaction_id: String,
        phone: String,
        amount: i64,
        status: TxStatus,
    },
    Empty {
        status: NoneStatus,
    },
}

#[derive(Debug, Clone, Copy, Serialize)]
pub enum NoneStatus {
    #[serde(rename = "NONE")]
    None,
}

/// Convenience read for client-side session recovery after a restart.
pub async fn last_transaction(
    State(state): State<AppState>,
) -> Result<Json<LastTransactionResponse>, AppError> {
    match state.store.most_recent().await? {
        Some(tx) => Ok(Json(LastTransactionResponse::Present {
            transaction_id: tx.transaction_id,
            phone: tx.phone,
            amount: tx.amount,
            status: tx.status,
        })),
        None => Ok(Json(LastTransactionResponse::Empty {
            status: NoneStatus::None,
        })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn charge(phone: Option<&str>, amount: Option<i64>) -> ChargeRequest {
        ChargeRequest {
            phone: phone.map(str::to_string),
            amount,
        }
    }

    #[test]
    fn validation_requires_phone_and_positive_amount() {
        assert!(validate_charge(&charge(Some("0708374149"), Some(50))).is_ok());
        assert!(validate_charge(&charge(None, Some(50))).is_err());
        assert!(validate_charge(&charge(Some(""), Some(50))).is_err());
        assert!(validate_charge(&charge(Some("   "), Some(50))).is_err());
        assert!(validate_charge(&charge(Some("0708374149"), None)).is_err());
        assert!(validate_charge(&charge(Some("0708374149"), Some(0))).is_err());
        assert!(validate_charge(&charge(Some("0708374149"), Some(-5))).is_err());
    }

    #[test]
    fn gateway_errors_map_to_advisory_codes() {
        let cases = [
            (GatewayError::RateLimited, ErrorCode::DarajaRateLimit, ClientAction::Wait),
            (
                GatewayError::Unavailable("503".to_string()),
                ErrorCode::ServiceTemporaryDown,
                ClientAction::Wait,
            ),
            (
                GatewayError::AuthFailure("401".to_string()),
                ErrorCode::ServiceTemporaryDown,
                ClientAction::Wait,
            ),
            (
                GatewayError::NetworkDelay("timeout".to_string()),
                ErrorCode::NetworkDelay,
                ClientAction::Wait,
            ),
            (
                GatewayError::InvalidInput("bad amount".to_string()),
                ErrorCode::InvalidInput,
                ClientAction::Reenter,
            ),
        ];

        for (err, code, action) in cases {
            let body = ChargeErrorBody::from_gateway(&err);
            assert_eq!(body.code, code, "wrong code for {:?}", err);
            assert_eq!(body.action, action, "wrong action for {:?}", err);
            assert!(body.safe);
        }
    }

    #[test]
    fn error_body_wire_shape() {
        let body = ChargeErrorBody::from_gateway(&GatewayError::RateLimited);
        let value = serde_json::to_value(ChargeResponse::Error(body)).unwrap();
        assert_eq!(value["status"], json!("ERROR"));
        assert_eq!(value["code"], json!("DARAJA_RATE_LIMIT"));
        assert_eq!(value["action"], json!("WAIT"));
        assert_eq!(value["safe"], json!(true));
        assert!(value["message"].is_string());
    }

    #[test]
    fn accepted_body_wire_shape() {
        let value = serde_json::to_value(ChargeResponse::Accepted {
            transaction_id: "ws_CO_191220191020363925".to_string(),
            status: TxStatus::Pending,
        })
        .unwrap();
        assert_eq!(
            value,
            json!({ "transactionId": "ws_CO_191220191020363925", "status": "PENDING" })
        );
    }

    #[test]
    fn callback_acks_are_fixed_envelopes() {
        assert_eq!(
            serde_json::to_value(CallbackAck::accepted()).unwrap(),
            json!({ "ResultCode": 0, "ResultDesc": "Accepted" })
        );
        assert_eq!(
            serde_json::to_value(CallbackAck::invalid()).unwrap(),
            json!({ "ResultCode": 0, "ResultDesc": "Invalid callback payload" })
        );
    }

    #[test]
    fn last_transaction_sentinel_shape() {
        let value = serde_json::to_value(LastTransactionResponse::Empty {
            status: NoneStatus::None,
        })
        .unwrap();
        assert_eq!(value, json!({ "status": "NONE" }));

        let value = serde_json::to_value(LastTransactionResponse::Present {
            transaction_id: "ws_CO_1".to_string(),
            phone: "0708374149".to_string(),
            amount: 50,
            status: TxStatus::Success,
        })
        .unwrap();
        assert_eq!(
            value,
            json!({
                "transaction_id": "ws_CO_1",
                "phone": "0708374149",
                "amount": 50,
                "status": "SUCCESS"
            })
        );
    }
}
