use async_trait::async_trait;

use crate::client::{Connector, Deliver};
use crate::error::DerivResult;
use crate::types::{DerivClient, Request, Response, SubscriptionKind};

/// The call surface that per-domain API wrappers build on.
#[async_trait]
pub trait DerivApi: Send + Sync {
    /// Send a request and return the response that answers it
    async fn call(&self, request: Request) -> DerivResult<Response>;

    /// Send a subscribe request; later pushes go to `deliver`
    async fn subscribe_call(&self, request: Request, deliver: Deliver) -> DerivResult<Response>;

    /// Send a forget request for one subscription id
    async fn cancel_subscription(&self, id: &str) -> DerivResult<Response>;

    /// Send a forget_all request for one kind of subscription
    async fn cancel_all_subscriptions(&self, kind: &SubscriptionKind) -> DerivResult<Response>;

    /// Send a ping request
    async fn ping(&self) -> DerivResult<Response> {
        self.call(Request::ping()).await
    }

    /// Send a server time request
    async fn server_time(&self) -> DerivResult<Response> {
        self.call(Request::time()).await
    }
}

#[async_trait]
impl<C: Connector> DerivApi for DerivClient<C> {
    async fn call(&self, request: Request) -> DerivResult<Response> {
        DerivClient::call(self, request).await
    }

    async fn subscribe_call(&self, request: Request, deliver: Deliver) -> DerivResult<Response> {
        DerivClient::subscribe_call(self, request, move |response| deliver(response)).await
    }

    async fn cancel_subscription(&self, id: &str) -> DerivResult<Response> {
        DerivClient::cancel_subscription(self, id).await
    }

    async fn cancel_all_subscriptions(&self, kind: &SubscriptionKind) -> DerivResult<Response> {
        DerivClient::cancel_all_subscriptions(self, kind).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::testing::ScriptedConnector;
    use crate::settings::ClientConfig;
    use serde_json::json;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    async fn server_time_via(api: &impl DerivApi) -> DerivResult<Response> {
        api.server_time().await
    }

    #[tokio::test]
    async fn test_provided_methods_go_through_call() {
        let client =
            DerivClient::with_connector(ScriptedConnector::new(), &ClientConfig::new("1089"));
        client
            .connection()
            .push_inbound(r#"{"msg_type":"time","time":1700000000}"#);

        let response = server_time_via(&client).await.unwrap();

        assert_eq!(response.get("time"), Some(&json!(1700000000)));
        assert_eq!(client.connection().sent(), vec![r#"{"time":1}"#.to_string()]);
    }

    #[tokio::test]
    async fn test_subscribe_call_through_trait_object() {
        let client =
            DerivClient::with_connector(ScriptedConnector::new(), &ClientConfig::new("1089"));
        client.connection().push_inbound(
            r#"{"msg_type":"ohlc","ohlc":{"open":"100.0"},"subscription":{"id":"c-1"}}"#,
        );

        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let deliver: Deliver = Arc::new(move |_: Response| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let api: &dyn DerivApi = &client;
        let first = api
            .subscribe_call(Request::new("ticks_history", "R_100").param("style", "candles"), deliver)
            .await
            .unwrap();

        assert_eq!(first.subscription_id(), Some("c-1"));
        client.connection().push_inbound(
            r#"{"msg_type":"ohlc","ohlc":{"open":"101.0"},"subscription":{"id":"c-1"}}"#,
        );
        client
            .listen_for(std::time::Duration::from_millis(10))
            .await
            .unwrap();

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(
            client.active_subscriptions().await[0].kind,
            SubscriptionKind::Candles
        );
    }
}
