// config.rs
use std::env;

const SANDBOX_BASE_URL: &str = "https://sandbox.safaricom.co.ke";
const PRODUCTION_BASE_URL: &str = "https://api.safaricom.co.ke";

// Public Daraja sandbox credentials, overridable for production.
const SANDBOX_SHORT_CODE: &str = "174379";
const SANDBOX_PASSKEY: &str = "bfb279f9aa9bdbcf158e97dd71a467cd";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub mpesa_consumer_key: String,
    pub mpesa_consumer_secret: String,
    pub mpesa_short_code: String,
    pub mpesa_passkey: String,
    pub mpesa_environment: String,
    pub base_url: String,
    pub database_url: String,
    pub port: u16,
    pub host: String,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let mpesa_environment =
            env::var("MPESA_ENVIRONMENT").unwrap_or_else(|_| "sandbox".to_string());

        AppConfig {
            mpesa_consumer_key: env::var("MPESA_CONSUMER_KEY")
                .expect("MPESA_CONSUMER_KEY must be set"),
            mpesa_consumer_secret: env::var("MPESA_CONSUMER_SECRET")
                .expect("MPESA_CONSUMER_SECRET must be set"),
            mpesa_short_code: env::var("MPESA_SHORT_CODE")
                .unwrap_or_else(|_| SANDBOX_SHORT_CODE.to_string()),
            mpesa_passkey: env::var("MPESA_PASSKEY")
                .unwrap_or_else(|_| SANDBOX_PASSKEY.to_string()),
            mpesa_environment,
            base_url: env::var("BASE_URL").expect("BASE_URL must be set"),
            database_url: env::var("DATABASE_URL").expect("DATABASE_URL must be set"),
            port: env::var("PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .expect("PORT must be a number"),
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
        }
    }

    pub fn is_production(&self) -> bool {
        self.mpesa_environment == "production"
    }

    fn gateway_base_url(&self) -> &'static str {
        if self.is_production() {
            PRODUCTION_BASE_URL
        } else {
            SANDBOX_BASE_URL
        }
    }

    pub fn auth_url(&self) -> String {
        format!(
            "{}/oauth/v1/generate?grant_type=client_credentials",
            self.gateway_base_url()
        )
    }

    pub fn stk_url(&self) -> String {
        format!("{}/mpesa/stkpush/v1/processrequest", self.gateway_base_url())
    }

    /// Externally reachable URL the gateway will deliver callbacks to.
    pub fn callback_url(&self) -> String {
        format!("{}/callback", self.base_url.trim_end_matches('/'))
    }
}
