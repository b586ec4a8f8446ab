use serde_json::Value;
use std::collections::HashSet;
use std::sync::{Mutex, PoisonError};

use crate::error::{DerivError, DerivResult};
use crate::types::{Request, Response};

/// What the server shows in `echo_req` instead of a secret.
const MASKED_ECHO: &str = "<not shown>";

/// `msg_type` values that answer an operation under another name.
fn aliases(operation: &str) -> &'static [&'static str] {
    match operation {
        "ticks" => &["tick", "history", "candles", "ohlc"],
        "ticks_history" => &["history", "candles", "ohlc"],
        "candles" => &["candles", "ohlc"],
        _ => &[],
    }
}

/// Whether `response` is the reply to `request`.
///
/// Replies carry no client-assigned id, so they are matched on the primary
/// operation key. When the server echoes the request, the echoed key must
/// also carry the value that was sent. Frames tagged with a subscription id
/// never answer a request that did not ask to subscribe.
pub(crate) fn answers(response: &Response, request: &Request) -> bool {
    let operation = request.operation();

    // A push can only answer the request that opens a stream
    if response.subscription_id().is_some() && !request.is_subscription() {
        return false;
    }

    if let Some(echo) = response.echo_req() {
        return match (echo.get(operation), request.get(operation)) {
            (Some(echoed), Some(sent)) => echo_matches(echoed, sent),
            _ => false,
        };
    }

    if response.is_error() || response.contains_key(operation) {
        return true;
    }

    response
        .msg_type()
        .is_some_and(|msg_type| msg_type == operation || aliases(operation).contains(&msg_type))
}

fn echo_matches(echoed: &Value, sent: &Value) -> bool {
    if echoed == sent || echoed.as_str() == Some(MASKED_ECHO) {
        return true;
    }

    // `1` and `1.0` are the same request
    matches!((echoed.as_f64(), sent.as_f64()), (Some(a), Some(b)) if a == b)
}

/// Primary keys of calls queued or in flight on one client.
///
/// Replies are matched by key, so two pending calls sharing a key could
/// receive each other's answer; the second one is refused instead.
#[derive(Debug, Default)]
pub struct PendingCalls {
    keys: Mutex<HashSet<String>>,
}

impl PendingCalls {
    pub(crate) fn claim(&self, operation: &str) -> DerivResult<PendingCall<'_>> {
        let mut keys = self.keys.lock().unwrap_or_else(PoisonError::into_inner);
        if !keys.insert(operation.to_string()) {
            return Err(DerivError::DuplicateCall(operation.to_string()));
        }

        Ok(PendingCall {
            calls: self,
            operation: operation.to_string(),
        })
    }

    pub(crate) fn is_pending(&self, operation: &str) -> bool {
        self.keys
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(operation)
    }
}

/// Releases its key when the call finishes or is dropped.
pub(crate) struct PendingCall<'a> {
    calls: &'a PendingCalls,
    operation: String,
}

impl Drop for PendingCall<'_> {
    fn drop(&mut self) {
        self.calls
            .keys
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.operation);
    }
}
