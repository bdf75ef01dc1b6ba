// services/mpesa_service.rs
use base64::{engine::general_purpose::STANDARD as base64, Engine as _};
use chrono::{DateTime, Utc};
use reqwest::{header, Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{error, info};

use crate::config::AppConfig;
use crate::errors::GatewayError;

#[derive(Debug, Deserialize)]
pub struct AuthResponse {
    pub access_token: String,
    pub expires_in: String,
}

#[derive(Debug, Serialize)]
pub struct StkPushRequest {
    #[serde(rename = "BusinessShortCode")]
    pub business_short_code: String,
    #[serde(rename = "Password")]
    pub password: String,
    #[serde(rename = "Timestamp")]
    pub timestamp: String,
    #[serde(rename = "TransactionType")]
    pub transaction_type: String,
    #[serde(rename = "Amount")]
    pub amount: String,
    #[serde(rename = "PartyA")]
    pub party_a: String,
    #[serde(rename = "PartyB")]
    pub party_b: String,
    #[serde(rename = "PhoneNumber")]
    pub phone_number: String,
    #[serde(rename = "CallBackURL")]
    pub callback_url: String,
    #[serde(rename = "AccountReference")]
    pub account_reference: String,
    #[serde(rename = "TransactionDesc")]
    pub transaction_desc: String,
}

#[derive(Debug, Deserialize)]
pub struct StkPushResponse {
    #[serde(rename = "MerchantRequestID")]
    pub merchant_request_id: String,
    #[serde(rename = "CheckoutRequestID")]
    pub checkout_request_id: String,
    #[serde(rename = "ResponseCode")]
    pub response_code: String,
    #[serde(rename = "ResponseDescription")]
    pub response_description: String,
}

/// Client for the gateway's two-step protocol: a basic-auth credential
/// exchange for a short-lived bearer token, then a charge submission signed
/// with the timestamp-derived password.
#[derive(Debug, Clone)]
pub struct MpesaService {
    config: AppConfig,
    client: Client,
    cached_token: Arc<RwLock<Option<(String, DateTime<Utc>)>>>,
}

/// `YYYYMMDDHHMMSS`, the exact format the password derivation and the STK
/// payload both embed.
fn format_timestamp(now: &DateTime<Utc>) -> String {
    now.format("%Y%m%d%H%M%S").to_string()
}

/// base64(shortcode + passkey + timestamp). A fixed shared-secret
/// concatenation, not a MAC; the gateway checks bytes, so concatenation
/// order and timestamp format must match exactly.
fn derive_password(short_code: &str, passkey: &str, timestamp: &str) -> String {
    base64.encode(format!("{}{}{}", short_code, passkey, timestamp))
}

/// Normalize Kenyan local forms to the 254 prefix the gateway expects. The
/// caller's original string is what gets stored; this only shapes the wire
/// payload. Unrecognized shapes pass through untouched.
fn format_phone_number(phone: &str) -> String {
    let phone = phone.trim();
    if phone.starts_with("254") && phone.len() == 12 {
        return phone.to_string();
    }
    if phone.starts_with("07") && phone.len() == 10 {
        return format!("254{}", &phone[1..]);
    }
    if phone.starts_with('7') && phone.len() == 9 {
        return format!("254{}", phone);
    }
    phone.to_string()
}

/// Charge-submission statuses map to distinct retry recommendations: 429 is
/// the gateway throttling us, 5xx is the gateway down, everything else is
/// reported as transport delay.
fn classify_charge_status(status: StatusCode) -> GatewayError {
    if status == StatusCode::TOO_MANY_REQUESTS {
        GatewayError::RateLimited
    } else if status.is_server_error() {
        GatewayError::Unavailable(status.to_string())
    } else {
        GatewayError::NetworkDelay(format!("gateway responded {}", status))
    }
}

impl MpesaService {
    pub fn new(config: AppConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to create HTTP client");

        MpesaService {
            config,
            client,
            cached_token: Arc::new(RwLock::new(None)),
        }
    }

    /// Basic-auth client-credentials exchange. Tokens are reused until five
    /// minutes before their expiry, so only cache misses hit the gateway.
    pub async fn get_access_token(&self) -> Result<String, GatewayError> {
        {
            let cached = self.cached_token.read().unwrap();
            if let Some((token, expiry)) = cached.as_ref() {
                if *expiry > Utc::now() + chrono::Duration::minutes(5) {
                    return Ok(token.clone());
                }
            }
        }

        info!("Requesting new access token");
        let credentials = format!(
            "{}:{}",
            self.config.mpesa_consumer_key, self.config.mpesa_consumer_secret
        );
        let encoded = base64.encode(credentials);

        let response = self
            .client
            .get(self.config.auth_url())
            .header(header::AUTHORIZATION, format!("Basic {}", encoded))
            .send()
            .await
            .map_err(|e| GatewayError::NetworkDelay(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!("Access token request failed: {} - {}", status, body);
            return Err(GatewayError::AuthFailure(format!(
                "gateway responded {}",
                status
            )));
        }

        let auth: AuthResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::AuthFailure(format!("unreadable auth response: {}", e)))?;

        {
            let expiry = Utc::now() + chrono::Duration::hours(1);
            let mut cached = self.cached_token.write().unwrap();
            *cached = Some((auth.access_token.clone(), expiry));
        }

        info!("Access token obtained");
        Ok(auth.access_token)
    }

    /// Submit an STK push and return the gateway-issued correlation id.
    pub async fn submit_charge(&self, phone: &str, amount: i64) -> Result<String, GatewayError> {
        if amount <= 0 {
            return Err(GatewayError::InvalidInput(
                "Amount must be greater than 0".to_string(),
            ));
        }

        let access_token = self.get_access_token().await?;
        let formatted_phone = format_phone_number(phone);
        let timestamp = format_timestamp(&Utc::now());
        let password = derive_password(
            &self.config.mpesa_short_code,
            &self.config.mpesa_passkey,
            &timestamp,
        );

        let request = StkPushRequest {
            business_short_code: self.config.mpesa_short_code.clone(),
            password,
            timestamp,
            transaction_type: "CustomerPayBillOnline".to_string(),
            amount: amount.to_string(),
            party_a: formatted_phone.clone(),
            party_b: self.config.mpesa_short_code.clone(),
            phone_number: formatted_phone,
            callback_url: self.config.callback_url(),
            account_reference: "ESP8266".to_string(),
            transaction_desc: "ESP8266 Payment".to_string(),
        };

        info!("STK push for {} - KSh {}", request.phone_number, amount);

        let response = self
            .client
            .post(self.config.stk_url())
            .header(header::AUTHORIZATION, format!("Bearer {}", access_token))
            .header(header::CONTENT_TYPE, "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| GatewayError::NetworkDelay(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!("STK push failed: {} - {}", status, body);
            return Err(classify_charge_status(status));
        }

        let stk_response: StkPushResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::NetworkDelay(format!("unreadable gateway response: {}", e)))?;

        info!(
            "STK push accepted: {} (merchant request {})",
            stk_response.checkout_request_id, stk_response.merchant_request_id
        );
        Ok(stk_response.checkout_request_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn timestamp_is_fourteen_digit_utc() {
        let moment = Utc.with_ymd_and_hms(2024, 1, 15, 9, 5, 3).unwrap();
        assert_eq!(format_timestamp(&moment), "20240115090503");
    }

    #[test]
    fn password_reproduces_exact_concatenation() {
        assert_eq!(
            derive_password("174379", "bfb279f9aa9bdbcf158e97dd71a467cd", "20240115090503"),
            "MTc0Mzc5YmZiMjc5ZjlhYTliZGJjZjE1OGU5N2RkNzFhNDY3Y2QyMDI0MDExNTA5MDUwMw=="
        );
        assert_eq!(
            derive_password("600999", "testpasskey", "20200101000000"),
            "NjAwOTk5dGVzdHBhc3NrZXkyMDIwMDEwMTAwMDAwMA=="
        );
    }

    #[test]
    fn phone_normalization() {
        assert_eq!(format_phone_number("254708374149"), "254708374149");
        assert_eq!(format_phone_number("0708374149"), "254708374149");
        assert_eq!(format_phone_number("708374149"), "254708374149");
        assert_eq!(format_phone_number(" 0708374149 "), "254708374149");
        // Unknown shapes pass through for the gateway to reject.
        assert_eq!(format_phone_number("12345"), "12345");
    }

    #[test]
    fn charge_status_classification() {
        assert!(matches!(
            classify_charge_status(StatusCode::TOO_MANY_REQUESTS),
            GatewayError::RateLimited
        ));
        assert!(matches!(
            classify_charge_status(StatusCode::INTERNAL_SERVER_ERROR),
            GatewayError::Unavailable(_)
        ));
        assert!(matches!(
            classify_charge_status(StatusCode::SERVICE_UNAVAILABLE),
            GatewayError::Unavailable(_)
        ));
        assert!(matches!(
            classify_charge_status(StatusCode::BAD_REQUEST),
            GatewayError::NetworkDelay(_)
        ));
        assert!(matches!(
            classify_charge_status(StatusCode::UNAUTHORIZED),
            GatewayError::NetworkDelay(_)
        ));
    }
}
