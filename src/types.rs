use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock, mpsc};

use crate::client::{Connector, PendingCalls, SubscriptionManager, WsConnection};
use crate::error::{DerivError, DerivResult};

/// Keys that travel alongside an operation but never name one.
const AUXILIARY_KEYS: [&str; 4] = ["subscribe", "req_id", "passthrough", "authorize"];

/// One API call: a flat JSON object with a primary operation key.
///
/// The primary key both names the action and labels the payload of the
/// matching response (`{"ticks": "R_100"}` is answered by a `tick` message).
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    operation: String,
    body: Map<String, Value>,
}

impl Request {
    /// Build a request for `operation`, e.g. `Request::new("ticks", "R_100")`.
    pub fn new(operation: impl Into<String>, value: impl Into<Value>) -> Self {
        let operation = operation.into();
        let mut body = Map::new();
        body.insert(operation.clone(), value.into());
        Self { operation, body }
    }

    /// Wrap an arbitrary JSON object.
    ///
    /// The primary key is the first key that is not an auxiliary field
    /// (`subscribe`, `req_id`, `passthrough`, `authorize`), or the first key
    /// when only auxiliary fields are present (`{"authorize": "..."}`).
    pub fn from_value(value: Value) -> DerivResult<Self> {
        let Value::Object(body) = value else {
            return Err(DerivError::Protocol(
                "a request must be a JSON object".to_string(),
            ));
        };

        let operation = body
            .keys()
            .find(|key| !AUXILIARY_KEYS.contains(&key.as_str()))
            .or_else(|| body.keys().next())
            .cloned()
            .ok_or_else(|| DerivError::Protocol("a request cannot be empty".to_string()))?;

        Ok(Self { operation, body })
    }

    pub fn ping() -> Self {
        Self::new("ping", 1)
    }

    pub fn time() -> Self {
        Self::new("time", 1)
    }

    /// Latest tick for `symbol`; chain `.subscribe()` to stream them.
    pub fn ticks(symbol: impl Into<String>) -> Self {
        Self::new("ticks", symbol.into())
    }

    /// Cancel one subscription by id.
    pub fn forget(subscription_id: impl Into<String>) -> Self {
        Self::new("forget", subscription_id.into())
    }

    /// Cancel every subscription of `kind`.
    pub fn forget_all(kind: &SubscriptionKind) -> Self {
        Self::new("forget_all", kind.as_str())
    }

    /// Add or replace a parameter.
    pub fn param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.body.insert(key.into(), value.into());
        self
    }

    /// Ask the server to keep streaming updates after the first response.
    pub fn subscribe(self) -> Self {
        self.param("subscribe", 1)
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.body.get(key)
    }

    pub fn body(&self) -> &Map<String, Value> {
        &self.body
    }

    pub fn is_subscription(&self) -> bool {
        match self.body.get("subscribe") {
            Some(Value::Bool(flag)) => *flag,
            Some(Value::Number(n)) => n.as_f64().is_some_and(|n| n != 0.0),
            _ => false,
        }
    }

    pub(crate) fn set_authorization(&mut self, token: &str) {
        self.body
            .insert("authorize".to_string(), Value::String(token.to_string()));
    }

    pub fn to_json(&self) -> DerivResult<String> {
        Ok(serde_json::to_string(&self.body)?)
    }
}

impl Serialize for Request {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.body.serialize(serializer)
    }
}

/// A decoded inbound message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Response(Map<String, Value>);

impl Response {
    /// Decode one text frame.
    pub fn parse(text: &str) -> DerivResult<Self> {
        let value: Value = serde_json::from_str(text)
            .map_err(|err| DerivError::Protocol(format!("inbound frame is not JSON: {err}")))?;

        match value {
            Value::Object(map) if !map.is_empty() => Ok(Self(map)),
            Value::Object(_) => Err(DerivError::Protocol(
                "inbound frame is an empty object".to_string(),
            )),
            other => Err(DerivError::Protocol(format!(
                "inbound frame is not a JSON object: {other}"
            ))),
        }
    }

    /// The structured API error, when the server refused the request.
    pub fn error(&self) -> Option<ApiError> {
        let error = self.0.get("error")?;
        match serde_json::from_value(error.clone()) {
            Ok(api_error) => Some(api_error),
            Err(_) => Some(ApiError {
                code: String::new(),
                message: error.to_string(),
                details: None,
            }),
        }
    }

    pub fn is_error(&self) -> bool {
        self.0.contains_key("error")
    }

    pub fn subscription_id(&self) -> Option<&str> {
        self.0.get("subscription")?.get("id")?.as_str()
    }

    pub fn msg_type(&self) -> Option<&str> {
        self.0.get("msg_type")?.as_str()
    }

    /// The server's copy of the request this message answers.
    pub fn echo_req(&self) -> Option<&Map<String, Value>> {
        self.0.get("echo_req")?.as_object()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }
}

impl From<Map<String, Value>> for Response {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// The `error` object of a refused request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

/// The stream families accepted by `forget_all`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SubscriptionKind {
    Ticks,
    Candles,
    Proposal,
    Transaction,
    ProposalOpenContract,
    Balance,
    Other(String),
}

impl SubscriptionKind {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Ticks => "ticks",
            Self::Candles => "candles",
            Self::Proposal => "proposal",
            Self::Transaction => "transaction",
            Self::ProposalOpenContract => "proposal_open_contract",
            Self::Balance => "balance",
            Self::Other(name) => name,
        }
    }
}

/// Accepts both the `forget_all` name and the `msg_type` of a push.
impl From<&str> for SubscriptionKind {
    fn from(name: &str) -> Self {
        match name {
            "ticks" | "tick" | "history" => Self::Ticks,
            "candles" | "ohlc" => Self::Candles,
            "proposal" => Self::Proposal,
            "transaction" => Self::Transaction,
            "proposal_open_contract" => Self::ProposalOpenContract,
            "balance" => Self::Balance,
            other => Self::Other(other.to_string()),
        }
    }
}

impl fmt::Display for SubscriptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A tracked subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionInfo {
    pub id: String,
    pub kind: SubscriptionKind,
}

/// Pushes for one subscription, delivered in wire order.
#[derive(Debug)]
pub struct Subscription {
    pub id: String,
    pub kind: SubscriptionKind,
    pub(crate) rx: mpsc::UnboundedReceiver<Response>,
}

impl Subscription {
    /// Next push, or `None` once the subscription is cancelled or the
    /// connection is gone and every buffered push has been read.
    pub async fn recv(&mut self) -> Option<Response> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Response> {
        self.rx.try_recv().ok()
    }
}

/// The Deriv client instance
/// * connection - The transport carrying every exchange.
/// * token - The bearer token stamped on outgoing requests.
/// * subscriptions - Routing table for pushed messages.
/// * pending - Primary keys of calls queued or in flight.
/// * turn - Serializes whole request/response exchanges.
/// * timeout - How long a call waits for its answer.
pub struct DerivClient<C: Connector = WsConnection> {
    pub(crate) connection: C,
    pub(crate) token: RwLock<Option<String>>,
    pub(crate) subscriptions: SubscriptionManager,
    pub(crate) pending: PendingCalls,
    pub(crate) turn: Mutex<()>,
    pub(crate) timeout: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_primary_key_skips_auxiliary_fields() {
        let request =
            Request::from_value(json!({"subscribe": 1, "req_id": 7, "candles": "R_100"})).unwrap();
        assert_eq!(request.operation(), "candles");
        assert!(request.is_subscription());

        let request = Request::from_value(json!({"authorize": "a1-secret"})).unwrap();
        assert_eq!(request.operation(), "authorize");
    }

    #[test]
    fn test_from_value_rejects_non_objects() {
        assert!(Request::from_value(json!({})).is_err());
        assert!(Request::from_value(json!(["ping"])).is_err());
    }

    #[test]
    fn test_request_keys_survive_serialization_in_order() {
        let request = Request::new("proposal", 1)
            .param("amount", 10)
            .param("basis", "payout")
            .param("contract_type", "CALL")
            .param("barrier", "+0.1")
            .subscribe();

        let wire = request.to_json().unwrap();
        assert_eq!(
            wire,
            r#"{"proposal":1,"amount":10,"basis":"payout","contract_type":"CALL","barrier":"+0.1","subscribe":1}"#
        );

        let echoed = format!(r#"{{"echo_req":{wire},"msg_type":"proposal"}}"#);
        let response = Response::parse(&echoed).unwrap();
        assert_eq!(
            serde_json::to_string(response.echo_req().unwrap()).unwrap(),
            wire
        );
    }

    #[test]
    fn test_subscribe_flag_values() {
        assert!(!Request::ping().is_subscription());
        assert!(!Request::ping().param("subscribe", 0).is_subscription());
        assert!(Request::ping().param("subscribe", true).is_subscription());
    }

    #[test]
    fn test_response_parse_rejects_non_objects() {
        assert!(Response::parse("not json").unwrap_err().is_protocol());
        assert!(Response::parse("[1,2]").unwrap_err().is_protocol());
        assert!(Response::parse("{}").unwrap_err().is_protocol());
    }

    #[test]
    fn test_response_accessors() {
        let response = Response::parse(
            r#"{"msg_type":"tick","tick":{"quote":1.5},"subscription":{"id":"abc"}}"#,
        )
        .unwrap();

        assert_eq!(response.msg_type(), Some("tick"));
        assert_eq!(response.subscription_id(), Some("abc"));
        assert!(!response.is_error());
        assert!(response.error().is_none());
    }

    #[test]
    fn test_malformed_error_field_is_still_an_error() {
        let response = Response::parse(r#"{"error":"boom"}"#).unwrap();

        let error = response.error().unwrap();
        assert!(error.code.is_empty());
        assert_eq!(error.message, r#""boom""#);
    }

    #[test]
    fn test_subscription_kind_names() {
        assert_eq!(SubscriptionKind::from("tick"), SubscriptionKind::Ticks);
        assert_eq!(SubscriptionKind::from("ohlc"), SubscriptionKind::Candles);
        assert_eq!(
            SubscriptionKind::from("proposal_open_contract").as_str(),
            "proposal_open_contract"
        );
        assert_eq!(
            SubscriptionKind::from("p2p_order"),
            SubscriptionKind::Other("p2p_order".to_string())
        );
    }
}
