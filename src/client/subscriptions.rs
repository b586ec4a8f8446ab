use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};

use crate::types::{Request, Response, SubscriptionInfo, SubscriptionKind};

/// Callback receiving each push of one subscription.
pub type Deliver = Arc<dyn Fn(Response) + Send + Sync>;

struct Entry {
    kind: SubscriptionKind,
    request: Request,
    deliver: Deliver,
}

/// Routes pushed messages to their subscribers by subscription id.
///
/// Membership is only used for routing: cancellations are forwarded to the
/// server whether or not the id is known here.
///
/// Ids forgotten on this connection are remembered until it closes, since
/// the server may still flush pushes it had queued for them.
#[derive(Default)]
pub struct SubscriptionManager {
    active: Mutex<HashMap<String, Entry>>,
    retired: Mutex<HashSet<String>>,
}

impl SubscriptionManager {
    pub async fn register(
        &self,
        id: impl Into<String>,
        kind: SubscriptionKind,
        request: Request,
        deliver: Deliver,
    ) {
        let id = id.into();
        tracing::info!("Tracking {} subscription {}", kind, id);

        self.retired.lock().await.remove(&id);

        self.active.lock().await.insert(
            id,
            Entry {
                kind,
                request,
                deliver,
            },
        );
    }

    /// Hand `response` to its subscriber. Returns false when the message
    /// names no tracked subscription.
    pub async fn dispatch(&self, response: &Response) -> bool {
        let Some(id) = response.subscription_id() else {
            return false;
        };

        let deliver = match self.active.lock().await.get(id) {
            Some(entry) => Arc::clone(&entry.deliver),
            None => return false,
        };

        deliver(response.clone());
        true
    }

    /// Whether `response` is a late push for an id forgotten on this
    /// connection.
    pub async fn is_retired(&self, response: &Response) -> bool {
        match response.subscription_id() {
            Some(id) => self.retired.lock().await.contains(id),
            None => false,
        }
    }

    pub async fn remove(&self, id: &str) -> bool {
        let removed = self.active.lock().await.remove(id).is_some();
        self.retired.lock().await.insert(id.to_string());

        if removed {
            tracing::info!("Stopped tracking subscription {}", id);
        }
        removed
    }

    pub async fn remove_kind(&self, kind: &SubscriptionKind) -> usize {
        let mut active = self.active.lock().await;
        let ids: Vec<String> = active
            .iter()
            .filter(|(_, entry)| entry.kind == *kind)
            .map(|(id, _)| id.clone())
            .collect();

        for id in &ids {
            active.remove(id);
        }
        self.retired.lock().await.extend(ids.iter().cloned());

        tracing::info!("Stopped tracking {} {} subscription(s)", ids.len(), kind);
        ids.len()
    }

    /// Forget everything, including retired ids. Only called when the
    /// connection is closed or about to be replaced.
    pub async fn clear(&self) -> usize {
        self.retired.lock().await.clear();

        let mut active = self.active.lock().await;
        let removed = active.len();
        active.clear();
        removed
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.active.lock().await.contains_key(id)
    }

    pub async fn request_for(&self, id: &str) -> Option<Request> {
        self.active
            .lock()
            .await
            .get(id)
            .map(|entry| entry.request.clone())
    }

    pub async fn snapshot(&self) -> Vec<SubscriptionInfo> {
        let mut subscriptions: Vec<_> = self
            .active
            .lock()
            .await
            .iter()
            .map(|(id, entry)| SubscriptionInfo {
                id: id.clone(),
                kind: entry.kind.clone(),
            })
            .collect();
        subscriptions.sort_by(|a, b| a.id.cmp(&b.id));
        subscriptions
    }
}

/// A sink that only logs, for subscribe requests made through plain `call`.
pub(crate) fn log_pushes(operation: &str) -> Deliver {
    let operation = operation.to_string();
    Arc::new(move |response: Response| {
        tracing::debug!(
            "Push for '{}' subscription {:?} with no subscriber",
            operation,
            response.subscription_id()
        );
    })
}

/// A sink feeding an unbounded channel; the receiver ends when the
/// subscription is dropped from tracking.
pub(crate) fn channel() -> (Deliver, mpsc::UnboundedReceiver<Response>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let deliver: Deliver = Arc::new(move |response: Response| {
        if tx.send(response).is_err() {
            tracing::debug!("Subscription receiver dropped, push discarded");
        }
    });
    (deliver, rx)
}
