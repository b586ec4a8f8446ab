use futures_util::SinkExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

use super::connector::{ConnectionState, Connector, WsConnection};
use crate::error::{DerivError, DerivResult};
use crate::traits::DerivApi;
use crate::types::DerivClient;

impl WsConnection {
    pub(crate) async fn write_text(&self, payload: &str) -> DerivResult<()> {
        if !self.is_open() {
            return Err(DerivError::Connection("socket is not open".to_string()));
        }

        let mut ws_write = self.writer.lock().await;
        let Some(sink) = ws_write.as_mut() else {
            return Err(DerivError::Connection("socket is not open".to_string()));
        };

        tracing::debug!("Sending frame ({} bytes)", payload.len());

        let sent = sink.send(Message::text(payload.to_owned())).await;
        if let Err(err) = sent {
            ws_write.take();
            self.set_state(ConnectionState::Closed);
            return Err(err.into());
        }

        Ok(())
    }
}

impl<C: Connector + 'static> DerivClient<C> {
    /// Ping the server every `interval` so idle connections are not dropped.
    ///
    /// The ping travels through the ordinary call path, so it waits its turn
    /// behind in-flight calls. A tick is skipped while another `ping` call is
    /// pending. A caller's own `ping()` issued while a keepalive ping is in
    /// flight fails with `DerivError::DuplicateCall("ping")` and can simply be
    /// retried. Failures are logged and the loop carries on.
    pub fn spawn_keepalive(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let client = Arc::clone(self);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;

            loop {
                ticker.tick().await;

                if client.is_pending("ping") {
                    tracing::debug!("Keepalive skipped, a ping is already pending");
                    continue;
                }

                match client.ping().await {
                    Ok(response) if response.is_error() => {
                        tracing::warn!("Keepalive ping refused: {:?}", response.error());
                    }
                    Ok(_) => tracing::debug!("Keepalive ping answered"),
                    Err(err) => tracing::warn!("Keepalive ping failed: {}", err),
                }
            }
        })
    }
}
