//! Wire types for the venue's account streaming protocol
//!
//! Outbound requests are JSON objects tagged by `op`; inbound frames are
//! tagged by `event`. Balances arrive with string-encoded decimal amounts.

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use std::str::FromStr;

/// Outbound request frames
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum ClientRequest {
    Authenticate {
        token: String,
    },
    SwitchAccount {
        #[serde(rename = "accountId")]
        account_id: String,
    },
    Subscribe {
        channel: String,
        subscribe: bool,
    },
}

impl ClientRequest {
    pub fn authenticate(token: impl Into<String>) -> Self {
        ClientRequest::Authenticate {
            token: token.into(),
        }
    }

    pub fn switch_account(account_id: impl Into<String>) -> Self {
        ClientRequest::SwitchAccount {
            account_id: account_id.into(),
        }
    }

    /// Subscription request for the balance channel
    pub fn subscribe_balance() -> Self {
        ClientRequest::Subscribe {
            channel: "balance".to_string(),
            subscribe: true,
        }
    }

    /// Authentication is the only request allowed on an unauthenticated link
    pub fn is_authenticate(&self) -> bool {
        matches!(self, ClientRequest::Authenticate { .. })
    }
}

/// Venue error codes; anything unrecognized maps to `Other`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VenueErrorCode {
    AuthorizationRequired,
    InvalidCredential,
    AccountSwitchFailed,
    Other,
}

impl VenueErrorCode {
    /// Codes that end the session permanently, with no reconnection
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            VenueErrorCode::AuthorizationRequired
                | VenueErrorCode::InvalidCredential
                | VenueErrorCode::AccountSwitchFailed
        )
    }
}

impl<'de> Deserialize<'de> for VenueErrorCode {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(match raw.as_str() {
            "AUTHORIZATION_REQUIRED" => VenueErrorCode::AuthorizationRequired,
            "INVALID_CREDENTIAL" => VenueErrorCode::InvalidCredential,
            "ACCOUNT_SWITCH_FAILED" => VenueErrorCode::AccountSwitchFailed,
            _ => VenueErrorCode::Other,
        })
    }
}

/// Protocol-level error payload
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorEnvelope {
    pub code: VenueErrorCode,
    #[serde(default)]
    pub message: String,
}

/// Authentication response; success names the active account
#[derive(Debug, Clone, Deserialize)]
pub struct AuthResult {
    #[serde(rename = "accountId")]
    pub account_id: Option<String>,
    pub error: Option<ErrorEnvelope>,
}

/// Account switch response; success echoes the now-active account
#[derive(Debug, Clone, Deserialize)]
pub struct SwitchResult {
    #[serde(rename = "accountId")]
    pub account_id: Option<String>,
    pub error: Option<ErrorEnvelope>,
}

/// Balance message for an account
#[derive(Debug, Clone, Deserialize)]
pub struct BalanceEvent {
    #[serde(rename = "accountId")]
    pub account_id: String,
    #[serde(deserialize_with = "deserialize_decimal")]
    pub balance: Decimal,
    pub currency: String,
    /// Present on the delivery that confirms a subscription
    #[serde(rename = "subscriptionId")]
    pub subscription_id: Option<String>,
    /// Venue timestamp in milliseconds since the epoch
    pub timestamp: Option<i64>,
}

impl BalanceEvent {
    /// Venue-reported time of the balance, when provided
    pub fn as_of(&self) -> Option<DateTime<Utc>> {
        self.timestamp
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
    }
}

/// Parsed inbound frame
#[derive(Debug, Clone)]
pub enum InboundMessage {
    Authenticated(AuthResult),
    AccountSwitched(SwitchResult),
    Balance(BalanceEvent),
    Error(ErrorEnvelope),
    Unknown(String),
}

impl InboundMessage {
    /// Parse a raw text frame from the venue
    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        let value: serde_json::Value = serde_json::from_str(raw)?;
        let event = value
            .get("event")
            .and_then(|e| e.as_str())
            .map(str::to_owned);

        // Handshake responses carry their error field inline; any other
        // frame with an error object is an error report, whatever its
        // event tag. Covers the bare envelopes some venue builds send.
        let error_field = match event.as_deref() {
            Some("authenticated") | Some("accountSwitched") => None,
            _ => value.get("error").filter(|e| !e.is_null()).cloned(),
        };
        if let Some(err) = error_field {
            return Ok(InboundMessage::Error(serde_json::from_value(err)?));
        }

        match event.as_deref() {
            Some("authenticated") => Ok(InboundMessage::Authenticated(serde_json::from_value(
                value,
            )?)),
            Some("accountSwitched") => Ok(InboundMessage::AccountSwitched(
                serde_json::from_value(value)?,
            )),
            Some("balance") => Ok(InboundMessage::Balance(serde_json::from_value(value)?)),
            Some("error") => Ok(InboundMessage::Error(ErrorEnvelope {
                code: VenueErrorCode::Other,
                message: raw.to_string(),
            })),
            _ => Ok(InboundMessage::Unknown(raw.to_string())),
        }
    }
}

fn deserialize_decimal<'de, D>(deserializer: D) -> Result<Decimal, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    Decimal::from_str(&s).map_err(serde::de::Error::custom)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn test_serialize_authenticate() {
        let request = ClientRequest::authenticate("secret-token");
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value, json!({"op": "authenticate", "token": "secret-token"}));
    }

    #[test]
    fn test_serialize_switch_account() {
        let request = ClientRequest::switch_account("ACC2");
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value, json!({"op": "switchAccount", "accountId": "ACC2"}));
    }

    #[test]
    fn test_serialize_subscribe_balance() {
        let request = ClientRequest::subscribe_balance();
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(
            value,
            json!({"op": "subscribe", "channel": "balance", "subscribe": true})
        );
    }

    #[test]
    fn test_parse_authenticated() {
        let raw = r#"{"event":"authenticated","accountId":"ACC1"}"#;
        let message = InboundMessage::parse(raw).unwrap();
        match message {
            InboundMessage::Authenticated(result) => {
                assert_eq!(result.account_id.as_deref(), Some("ACC1"));
                assert!(result.error.is_none());
            }
            _ => panic!("Expected Authenticated"),
        }
    }

    #[test]
    fn test_parse_authenticated_failure() {
        let raw = r#"{"event":"authenticated","error":{"code":"INVALID_CREDENTIAL","message":"bad token"}}"#;
        let message = InboundMessage::parse(raw).unwrap();
        match message {
            InboundMessage::Authenticated(result) => {
                assert!(result.account_id.is_none());
                let envelope = result.error.unwrap();
                assert_eq!(envelope.code, VenueErrorCode::InvalidCredential);
                assert_eq!(envelope.message, "bad token");
            }
            _ => panic!("Expected Authenticated"),
        }
    }

    #[test]
    fn test_parse_account_switched() {
        let raw = r#"{"event":"accountSwitched","accountId":"ACC2"}"#;
        let message = InboundMessage::parse(raw).unwrap();
        match message {
            InboundMessage::AccountSwitched(result) => {
                assert_eq!(result.account_id.as_deref(), Some("ACC2"));
            }
            _ => panic!("Expected AccountSwitched"),
        }
    }

    #[test]
    fn test_parse_balance() {
        let raw = r#"{"event":"balance","accountId":"ACC1","balance":"25431.88","currency":"USD","subscriptionId":"sub-41","timestamp":1755772800000}"#;
        let message = InboundMessage::parse(raw).unwrap();
        match message {
            InboundMessage::Balance(event) => {
                assert_eq!(event.account_id, "ACC1");
                assert_eq!(event.balance, dec!(25431.88));
                assert_eq!(event.currency, "USD");
                assert_eq!(event.subscription_id.as_deref(), Some("sub-41"));
                let as_of = event.as_of().unwrap();
                assert_eq!(as_of.timestamp_millis(), 1755772800000);
            }
            _ => panic!("Expected Balance"),
        }
    }

    #[test]
    fn test_parse_balance_without_subscription_id() {
        let raw = r#"{"event":"balance","accountId":"ACC1","balance":"100.00","currency":"EUR"}"#;
        let message = InboundMessage::parse(raw).unwrap();
        match message {
            InboundMessage::Balance(event) => {
                assert_eq!(event.balance, dec!(100.00));
                assert!(event.subscription_id.is_none());
                assert!(event.as_of().is_none());
            }
            _ => panic!("Expected Balance"),
        }
    }

    #[test]
    fn test_parse_error_event() {
        let raw = r#"{"event":"error","error":{"code":"AUTHORIZATION_REQUIRED","message":"authenticate first"}}"#;
        let message = InboundMessage::parse(raw).unwrap();
        match message {
            InboundMessage::Error(envelope) => {
                assert_eq!(envelope.code, VenueErrorCode::AuthorizationRequired);
                assert!(envelope.code.is_fatal());
            }
            _ => panic!("Expected Error"),
        }
    }

    #[test]
    fn test_parse_balance_tagged_error() {
        let raw = r#"{"event":"balance","accountId":"ACC1","error":{"code":"ACCOUNT_SWITCH_FAILED","message":"context lost"}}"#;
        let message = InboundMessage::parse(raw).unwrap();
        match message {
            InboundMessage::Error(envelope) => {
                assert_eq!(envelope.code, VenueErrorCode::AccountSwitchFailed);
                assert!(envelope.code.is_fatal());
            }
            _ => panic!("Expected Error"),
        }
    }

    #[test]
    fn test_error_outranks_complete_balance_fields() {
        let raw = r#"{"event":"balance","accountId":"ACC1","balance":"10.00","currency":"USD","error":{"code":"RATE_LIMITED","message":"slow down"}}"#;
        let message = InboundMessage::parse(raw).unwrap();
        assert!(matches!(message, InboundMessage::Error(_)));
    }

    #[test]
    fn test_null_error_field_is_not_an_error() {
        let raw = r#"{"event":"balance","accountId":"ACC1","balance":"10.00","currency":"USD","error":null}"#;
        let message = InboundMessage::parse(raw).unwrap();
        assert!(matches!(message, InboundMessage::Balance(_)));
    }

    #[test]
    fn test_parse_bare_error_envelope() {
        let raw = r#"{"error":{"code":"RATE_LIMITED","message":"slow down"}}"#;
        let message = InboundMessage::parse(raw).unwrap();
        match message {
            InboundMessage::Error(envelope) => {
                assert_eq!(envelope.code, VenueErrorCode::Other);
                assert!(!envelope.code.is_fatal());
            }
            _ => panic!("Expected Error"),
        }
    }

    #[test]
    fn test_parse_unknown_event() {
        let raw = r#"{"event":"heartbeat","seq":42}"#;
        let message = InboundMessage::parse(raw).unwrap();
        assert!(matches!(message, InboundMessage::Unknown(_)));
    }

    #[test]
    fn test_parse_malformed_json() {
        assert!(InboundMessage::parse("not json").is_err());
    }

    #[test]
    fn test_fatal_codes() {
        assert!(VenueErrorCode::AuthorizationRequired.is_fatal());
        assert!(VenueErrorCode::InvalidCredential.is_fatal());
        assert!(VenueErrorCode::AccountSwitchFailed.is_fatal());
        assert!(!VenueErrorCode::Other.is_fatal());
    }
}
