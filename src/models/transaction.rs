use serde::{Deserialize, Serialize};

/// Lifecycle of a charge attempt. A row enters PENDING when the gateway
/// accepts the initiate request; the asynchronous callback moves it exactly
/// once to SUCCESS or FAILED, and nothing else does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum TxStatus {
    Pending,
    Success,
    Failed,
}

/// Status as reported to a polling client. UNKNOWN covers ids the store has
/// never seen; callers must treat it as distinct from PENDING, not as an
/// error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PollStatus {
    Pending,
    Success,
    Failed,
    Unknown,
}

impl From<Option<TxStatus>> for PollStatus {
    fn from(status: Option<TxStatus>) -> Self {
        match status {
            Some(TxStatus::Pending) => PollStatus::Pending,
            Some(TxStatus::Success) => PollStatus::Success,
            Some(TxStatus::Failed) => PollStatus::Failed,
            None => PollStatus::Unknown,
        }
    }
}

/// Terminal transition reported by the gateway callback. The receipt rides
/// along only on success, and may still be absent when the gateway omits the
/// receipt metadata item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxOutcome {
    Success { receipt: Option<String> },
    Failed,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Transaction {
    pub transaction_id: String,
    pub phone: String,
    pub amount: i64,
    pub status: TxStatus,
    pub mpesa_receipt: Option<String>,
}
