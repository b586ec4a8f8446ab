mod auth;
mod connector;
mod correlator;
mod endpoint;
mod receiver;
mod sender;
mod subscriptions;

pub use auth::decorate;
pub use connector::{ConnectionState, Connector, WsConnection, WsStream};
pub use correlator::PendingCalls;
pub use endpoint::Endpoints;
pub use subscriptions::{Deliver, SubscriptionManager};

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;

use crate::error::{DerivError, DerivResult};
use crate::settings::ClientConfig;
use crate::types::{
    DerivClient, Request, Response, Subscription, SubscriptionInfo, SubscriptionKind,
};

impl DerivClient<WsConnection> {
    /// Create a Deriv API client; the connection opens on first use.
    pub fn new(config: &ClientConfig) -> DerivResult<Self> {
        config.validate()?;
        Ok(Self::with_connector(WsConnection::new(config), config))
    }

    /// Create a Deriv API client and open its connection.
    pub async fn connect(config: &ClientConfig) -> DerivResult<Self> {
        let client = Self::new(config)?;
        client.open().await?;
        Ok(client)
    }
}

impl<C: Connector> DerivClient<C> {
    /// Create a client over any transport.
    pub fn with_connector(connection: C, config: &ClientConfig) -> Self {
        Self {
            connection,
            token: RwLock::new(config.token.clone()),
            subscriptions: SubscriptionManager::default(),
            pending: PendingCalls::default(),
            turn: Mutex::new(()),
            timeout: config.timeout(),
        }
    }

    pub fn connection(&self) -> &C {
        &self.connection
    }

    pub async fn open(&self) -> DerivResult<()> {
        self.connection.open().await
    }

    pub fn is_open(&self) -> bool {
        self.connection.is_open()
    }

    /// Close the connection and forget every tracked subscription. A call
    /// waiting for its reply fails with a connection error.
    pub async fn close(&self, code: u16, reason: &str) -> DerivResult<()> {
        let dropped = self.subscriptions.clear().await;
        if dropped > 0 {
            tracing::info!("Dropped {} subscription(s) on close", dropped);
        }

        self.connection.close(code, reason).await
    }

    /// Close with a normal closure code.
    pub async fn disconnect(&self) -> DerivResult<()> {
        self.close(Endpoints::DEFAULT_CLOSE_CODE, Endpoints::DEFAULT_CLOSE_REASON)
            .await
    }

    /// Replace the token stamped on subsequent requests.
    pub async fn set_token(&self, token: Option<String>) {
        *self.token.write().await = token;
    }

    /// Send one request and wait for the message that answers it.
    ///
    /// Pushes for tracked subscriptions that arrive first are delivered to
    /// their subscribers. An API refusal comes back as `Ok` with an `error`
    /// field; only transport failures are `Err`. A subscribe request made
    /// here is tracked, but its pushes are only logged.
    pub async fn call(&self, request: Request) -> DerivResult<Response> {
        let deliver = request
            .is_subscription()
            .then(|| subscriptions::log_pushes(request.operation()));

        let (response, _) = self.exchange(request, deliver).await?;
        Ok(response)
    }

    /// Subscribe and hand every later push to `deliver`.
    ///
    /// Returns the first response only; it carries the subscription id.
    pub async fn subscribe_call<F>(&self, request: Request, deliver: F) -> DerivResult<Response>
    where
        F: Fn(Response) + Send + Sync + 'static,
    {
        let (response, _) = self
            .exchange(request.subscribe(), Some(Arc::new(deliver)))
            .await?;
        Ok(response)
    }

    /// Subscribe and receive later pushes through a channel. The
    /// subscription is `None` when the server refused it.
    pub async fn subscribe(
        &self,
        request: Request,
    ) -> DerivResult<(Response, Option<Subscription>)> {
        let (deliver, rx) = subscriptions::channel();
        let (response, info) = self.exchange(request.subscribe(), Some(deliver)).await?;

        let subscription = info.map(|info| Subscription {
            id: info.id,
            kind: info.kind,
            rx,
        });
        Ok((response, subscription))
    }

    /// Ask the server to forget one subscription. The id is forwarded even
    /// when it is not tracked here; tracking stops once the server agrees.
    pub async fn cancel_subscription(&self, id: &str) -> DerivResult<Response> {
        let response = self.call(Request::forget(id)).await?;

        match response.error() {
            Some(error) => tracing::warn!("Server refused to forget {}: {}", id, error),
            None => {
                self.subscriptions.remove(id).await;
            }
        }

        Ok(response)
    }

    /// Ask the server to forget every subscription of `kind`.
    pub async fn cancel_all_subscriptions(
        &self,
        kind: &SubscriptionKind,
    ) -> DerivResult<Response> {
        let response = self.call(Request::forget_all(kind)).await?;

        match response.error() {
            Some(error) => tracing::warn!("Server refused to forget all {}: {}", kind, error),
            None => {
                self.subscriptions.remove_kind(kind).await;
            }
        }

        Ok(response)
    }

    /// Read inbound messages for `duration` while no call is in flight,
    /// delivering pushes to their subscribers. Returns how many were
    /// delivered.
    pub async fn listen_for(&self, duration: Duration) -> DerivResult<usize> {
        let _turn = self.turn.lock().await;

        if !self.connection.is_open() {
            return Err(DerivError::Connection("socket is not open".to_string()));
        }

        let deadline = Instant::now() + duration;
        let mut dispatched = 0;

        loop {
            let text = match tokio::time::timeout_at(deadline, self.connection.receive_text()).await
            {
                Err(_) => return Ok(dispatched),
                Ok(Ok(text)) => text,
                Ok(Err(err)) if err.is_timeout() => {
                    if Instant::now() >= deadline {
                        return Ok(dispatched);
                    }
                    continue;
                }
                Ok(Err(err)) => {
                    self.transport_failed(&err).await;
                    return Err(err);
                }
            };

            let response = Response::parse(&text)?;
            if self.subscriptions.dispatch(&response).await {
                dispatched += 1;
            } else if self.subscriptions.is_retired(&response).await {
                tracing::debug!(
                    "Dropping late push for forgotten subscription {:?}",
                    response.subscription_id()
                );
            } else {
                tracing::warn!(
                    "Dropping '{}' message that belongs to no subscription",
                    response.msg_type().unwrap_or("unknown")
                );
            }
        }
    }

    pub async fn active_subscriptions(&self) -> Vec<SubscriptionInfo> {
        self.subscriptions.snapshot().await
    }

    pub async fn is_tracking(&self, subscription_id: &str) -> bool {
        self.subscriptions.contains(subscription_id).await
    }

    /// The request that opened a tracked subscription, e.g. to subscribe
    /// again after a reconnect.
    pub async fn subscription_request(&self, subscription_id: &str) -> Option<Request> {
        self.subscriptions.request_for(subscription_id).await
    }

    /// Whether a call with this primary key is queued or in flight.
    pub fn is_pending(&self, operation: &str) -> bool {
        self.pending.is_pending(operation)
    }

    async fn exchange(
        &self,
        request: Request,
        deliver: Option<Deliver>,
    ) -> DerivResult<(Response, Option<SubscriptionInfo>)> {
        let _pending = self.pending.claim(request.operation())?;
        let _turn = self.turn.lock().await;

        let token = self.token.read().await.clone();
        let request = auth::decorate(request, token.as_deref());

        if !self.connection.is_open() {
            let dropped = self.subscriptions.clear().await;
            if dropped > 0 {
                tracing::warn!("Reopening connection, dropped {} stale subscription(s)", dropped);
            }
            self.connection.reopen().await?;
        }

        let payload = request.to_json()?;
        tracing::debug!("Calling '{}'", request.operation());

        if let Err(err) = self.connection.send_text(&payload).await {
            self.transport_failed(&err).await;
            return Err(err);
        }

        let response = match tokio::time::timeout(self.timeout, self.await_reply(&request)).await {
            Ok(Ok(response)) => response,
            Ok(Err(err)) => {
                if err.is_connection() {
                    self.transport_failed(&err).await;
                }
                return Err(err);
            }
            Err(_) => {
                return Err(DerivError::Timeout {
                    task: format!("call '{}'", request.operation()),
                    duration: self.timeout,
                });
            }
        };

        let subscription = match (deliver, response.subscription_id()) {
            (Some(deliver), Some(id)) if request.is_subscription() => {
                let kind = response
                    .msg_type()
                    .map(SubscriptionKind::from)
                    .unwrap_or_else(|| SubscriptionKind::from(request.operation()));

                self.subscriptions
                    .register(id, kind.clone(), request.clone(), deliver)
                    .await;

                Some(SubscriptionInfo {
                    id: id.to_string(),
                    kind,
                })
            }
            _ => None,
        };

        Ok((response, subscription))
    }

    async fn await_reply(&self, request: &Request) -> DerivResult<Response> {
        loop {
            let text = self.connection.receive_text().await?;
            let response = Response::parse(&text)?;

            if self.subscriptions.dispatch(&response).await {
                continue;
            }

            if self.subscriptions.is_retired(&response).await {
                tracing::debug!(
                    "Dropping late push for forgotten subscription {:?}",
                    response.subscription_id()
                );
                continue;
            }

            if correlator::answers(&response, request) {
                return Ok(response);
            }

            tracing::warn!(
                "Dropping unmatched '{}' message while waiting for '{}'",
                response.msg_type().unwrap_or("unknown"),
                request.operation()
            );
        }
    }

    async fn transport_failed(&self, err: &DerivError) {
        let dropped = self.subscriptions.clear().await;
        tracing::warn!(
            "Transport failure ({}), dropped {} subscription(s)",
            err,
            dropped
        );
    }
}
