use crate::types::Request;

/// Stamp the bearer token on an outgoing request.
///
/// Without a token the request passes through untouched. Token lifetime is
/// owned by the caller; nothing here refreshes or retries.
pub fn decorate(mut request: Request, token: Option<&str>) -> Request {
    if let Some(token) = token {
        request.set_authorization(token);
    }
    request
}
