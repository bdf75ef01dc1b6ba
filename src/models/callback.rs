use serde::Deserialize;

const RECEIPT_ITEM_NAME: &str = "MpesaReceiptNumber";

// Daraja delivers results wrapped in Body -> stkCallback.
#[derive(Debug, Deserialize)]
pub struct CallbackEnvelope {
    #[serde(rename = "Body")]
    pub body: CallbackBody,
}

#[derive(Debug, Deserialize)]
pub struct CallbackBody {
    #[serde(rename = "stkCallback")]
    pub stk_callback: StkCallback,
}

#[derive(Debug, Deserialize)]
pub struct StkCallback {
    #[serde(rename = "CheckoutRequestID")]
    pub checkout_request_id: String,

    #[serde(rename = "ResultCode")]
    pub result_code: i32,

    #[serde(rename = "ResultDesc", default)]
    pub result_desc: Option<String>,

    #[serde(rename = "CallbackMetadata", default)]
    pub callback_metadata: Option<CallbackMetadata>,
}

#[derive(Debug, Deserialize)]
pub struct CallbackMetadata {
    #[serde(rename = "Item", default)]
    pub items: Vec<CallbackItem>,
}

#[derive(Debug, Deserialize)]
pub struct CallbackItem {
    #[serde(rename = "Name")]
    pub name: String,

    #[serde(rename = "Value", default)]
    pub value: serde_json::Value,
}

/// Outcome of parsing a raw callback delivery. Anything that does not match
/// the envelope is Malformed and must be acknowledged without touching the
/// store, since an error response could trigger gateway-side retry storms.
#[derive(Debug)]
pub enum ParsedCallback {
    Valid(StkCallback),
    Malformed,
}

pub fn parse_callback(raw: &[u8]) -> ParsedCallback {
    match serde_json::from_slice::<CallbackEnvelope>(raw) {
        Ok(envelope) => ParsedCallback::Valid(envelope.body.stk_callback),
        Err(_) => ParsedCallback::Malformed,
    }
}

impl StkCallback {
    /// Receipt number from the metadata items. String and numeric values are
    /// accepted; an absent item or an unusable value yields None rather than
    /// failing the callback.
    pub fn receipt_number(&self) -> Option<String> {
        let metadata = self.callback_metadata.as_ref()?;
        let item = metadata.items.iter().find(|item| item.name == RECEIPT_ITEM_NAME)?;
        match &item.value {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(value: serde_json::Value) -> Vec<u8> {
        serde_json::to_vec(&value).unwrap()
    }

    #[test]
    fn parses_success_callback_with_receipt() {
        let body = raw(json!({
            "Body": {
                "stkCallback": {
                    "MerchantRequestID": "29115-34620561-1",
                    "CheckoutRequestID": "ws_CO_191220191020363925",
                    "ResultCode": 0,
                    "ResultDesc": "The service request is processed successfully.",
                    "CallbackMetadata": {
                        "Item": [
                            { "Name": "Amount", "Value": 50 },
                            { "Name": "MpesaReceiptNumber", "Value": "NLJ7RT61SV" },
                            { "Name": "PhoneNumber", "Value": 254708374149u64 }
                        ]
                    }
                }
            }
        }));

        let callback = match parse_callback(&body) {
            ParsedCallback::Valid(cb) => cb,
            ParsedCallback::Malformed => panic!("expected valid callback"),
        };
        assert_eq!(callback.checkout_request_id, "ws_CO_191220191020363925");
        assert_eq!(callback.result_code, 0);
        assert_eq!(callback.receipt_number().as_deref(), Some("NLJ7RT61SV"));
    }

    #[test]
    fn numeric_receipt_value_is_stringified() {
        let body = raw(json!({
            "Body": {
                "stkCallback": {
                    "CheckoutRequestID": "ws_CO_1",
                    "ResultCode": 0,
                    "CallbackMetadata": {
                        "Item": [{ "Name": "MpesaReceiptNumber", "Value": 12345 }]
                    }
                }
            }
        }));

        let ParsedCallback::Valid(callback) = parse_callback(&body) else {
            panic!("expected valid callback");
        };
        assert_eq!(callback.receipt_number().as_deref(), Some("12345"));
    }

    #[test]
    fn missing_metadata_yields_no_receipt() {
        let body = raw(json!({
            "Body": {
                "stkCallback": {
                    "CheckoutRequestID": "ws_CO_2",
                    "ResultCode": 0
                }
            }
        }));

        let ParsedCallback::Valid(callback) = parse_callback(&body) else {
            panic!("expected valid callback");
        };
        assert_eq!(callback.receipt_number(), None);
    }

    #[test]
    fn failed_result_carries_no_metadata() {
        let body = raw(json!({
            "Body": {
                "stkCallback": {
                    "CheckoutRequestID": "ws_CO_3",
                    "ResultCode": 1032,
                    "ResultDesc": "Request cancelled by user"
                }
            }
        }));

        let ParsedCallback::Valid(callback) = parse_callback(&body) else {
            panic!("expected valid callback");
        };
        assert_eq!(callback.result_code, 1032);
        assert_eq!(callback.receipt_number(), None);
    }

    #[test]
    fn malformed_envelopes_are_tagged() {
        for body in [
            raw(json!({})),
            raw(json!({ "Body": {} })),
            raw(json!({ "Body": { "stkCallback": { "ResultCode": 0 } } })),
            b"not json at all".to_vec(),
        ] {
            assert!(
                matches!(parse_callback(&body), ParsedCallback::Malformed),
                "payload should be rejected: {:?}",
                String::from_utf8_lossy(&body)
            );
        }
    }
}
