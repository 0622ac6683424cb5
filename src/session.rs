//! A postgres client plus the driver task that owns its socket.
//!
//! `tokio_postgres::connect` hands back a `Client` and a `Connection`; the
//! `Connection` must be polled for the client to make progress, and it is the
//! only place where out-of-band traffic (LISTEN/NOTIFY payloads, socket
//! errors) surfaces. The stock pool managers spawn that future and discard
//! everything it yields, so this crate drives it itself and routes what it
//! sees through a per-session [`Registry`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::{StreamExt, stream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_postgres::{AsyncMessage, Client, NoTls};

use crate::error::PgConduitError;

/// Callback invoked with each notification payload on a registered channel.
pub type RouteCallback = Arc<dyn Fn(String) + Send + Sync>;

/// Callback invoked at most once if the connection dies out-of-band.
pub type ConnectionLostCallback = Arc<dyn Fn(String) + Send + Sync>;

/// Identifies the connection-lost observer attached at connect time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObserverToken(u64);

/// Identifies one LISTEN registration on a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerToken(u64);

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // Callbacks never run under the lock, so a poisoned guard still holds
    // consistent data.
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One notification registration: payloads are queued to a dedicated worker
/// task that invokes the callback, so delivery never blocks the driver and
/// stays in arrival order per channel. Dropping the sender ends the worker
/// once it has drained what was queued before removal.
struct Route {
    token: ListenerToken,
    queue: mpsc::UnboundedSender<String>,
}

/// Shared routing state between a session's owner and its driver task.
#[derive(Default)]
pub(crate) struct Registry {
    routes: Mutex<HashMap<String, Route>>,
    observer: Mutex<Option<(ObserverToken, ConnectionLostCallback)>>,
    lost: AtomicBool,
    next_token: AtomicU64,
}

impl Registry {
    fn mint(&self) -> u64 {
        self.next_token.fetch_add(1, Ordering::Relaxed)
    }

    /// Attach the single connection-lost observer.
    ///
    /// # Errors
    /// Returns `PgConduitError::Config` if an observer is already attached.
    pub(crate) fn attach_observer(
        &self,
        callback: ConnectionLostCallback,
    ) -> Result<ObserverToken, PgConduitError> {
        let mut slot = guard(&self.observer);
        if slot.is_some() {
            return Err(PgConduitError::Config(
                "an error observer is already attached to this connection".to_string(),
            ));
        }
        let token = ObserverToken(self.mint());
        *slot = Some((token, callback));
        Ok(token)
    }

    /// Detach the observer identified by `token`. Detaching an observer that
    /// is already gone (or was replaced) is a no-op.
    pub(crate) fn detach_observer(&self, token: ObserverToken) {
        let mut slot = guard(&self.observer);
        if slot.as_ref().is_some_and(|(t, _)| *t == token) {
            *slot = None;
        }
    }

    /// Register a notification route for `channel`.
    ///
    /// # Errors
    /// Returns `PgConduitError::ListenStatement` if the channel already has
    /// an active registration; a handle carries at most one per channel.
    pub(crate) fn register_route(
        &self,
        channel: &str,
        callback: RouteCallback,
    ) -> Result<ListenerToken, PgConduitError> {
        let mut routes = guard(&self.routes);
        if routes.contains_key(channel) {
            return Err(PgConduitError::ListenStatement(format!(
                "already listening on channel \"{channel}\""
            )));
        }
        let token = ListenerToken(self.mint());
        let (queue, mut pending) = mpsc::unbounded_channel::<String>();
        tokio::spawn(async move {
            while let Some(payload) = pending.recv().await {
                callback(payload);
            }
        });
        routes.insert(channel.to_string(), Route { token, queue });
        Ok(token)
    }

    /// Remove the registration for `channel` if `token` still identifies it.
    /// Removing an absent registration is a no-op.
    pub(crate) fn remove_route(&self, channel: &str, token: ListenerToken) {
        let mut routes = guard(&self.routes);
        if routes.get(channel).is_some_and(|route| route.token == token) {
            routes.remove(channel);
        }
    }

    /// Queue one notification payload for the channel's route, if any.
    /// Each channel's worker invokes the callback in arrival order; channels
    /// are independent of each other and of the driver task.
    pub(crate) fn dispatch(&self, channel: &str, payload: &str) {
        if let Some(route) = guard(&self.routes).get(channel) {
            let _ = route.queue.send(payload.to_string());
        }
    }

    /// Escalate an out-of-band connection error. Fires the observer at most
    /// once per session; later calls are no-ops. Never panics or re-raises:
    /// teardown of an already-bad connection only logs.
    pub(crate) fn escalate(&self, message: String) {
        if self.lost.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::error!(error = %message, "postgres connection lost");
        let taken = guard(&self.observer).take();
        if let Some((_token, callback)) = taken {
            tokio::spawn(async move { callback(message) });
        }
    }

    pub(crate) fn is_lost(&self) -> bool {
        self.lost.load(Ordering::SeqCst)
    }

    /// Clear all routing state so a recycled session presents a clean slate
    /// to its next borrower. Lost sessions are never recycled.
    pub(crate) fn reset(&self) {
        guard(&self.routes).clear();
        *guard(&self.observer) = None;
        self.lost.store(false, Ordering::SeqCst);
    }
}

/// An established connection: the client and the task driving its socket.
pub struct PgSession {
    client: Client,
    registry: Arc<Registry>,
    driver: JoinHandle<()>,
}

impl PgSession {
    /// Connect and spawn the driver task.
    ///
    /// The driver forwards notification messages to the registry and
    /// escalates a terminal stream error; notices and parameter changes are
    /// drained and dropped.
    ///
    /// # Errors
    /// Returns the driver error if the socket or authentication fails.
    pub(crate) async fn establish(
        config: &tokio_postgres::Config,
    ) -> Result<Self, tokio_postgres::Error> {
        let (client, mut connection) = config.connect(NoTls).await?;
        let registry = Arc::new(Registry::default());
        let events = Arc::clone(&registry);
        let driver = tokio::spawn(async move {
            let mut messages = stream::poll_fn(move |cx| connection.poll_message(cx));
            while let Some(message) = messages.next().await {
                match message {
                    Ok(AsyncMessage::Notification(n)) => events.dispatch(n.channel(), n.payload()),
                    Ok(_) => {}
                    Err(e) => {
                        events.escalate(e.to_string());
                        return;
                    }
                }
            }
            tracing::debug!("postgres connection driver finished");
        });
        Ok(Self {
            client,
            registry,
            driver,
        })
    }

    pub(crate) fn client(&self) -> &Client {
        &self.client
    }

    pub(crate) fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// True once the socket is gone (clean or not).
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.client.is_closed()
    }

    /// True once an out-of-band error has been escalated. A poisoned session
    /// must be destroyed, never recycled.
    #[must_use]
    pub fn is_poisoned(&self) -> bool {
        self.registry.is_lost()
    }

    /// Drop the client and wait for the driver to wind the socket down.
    ///
    /// # Errors
    /// Returns `PgConduitError::Teardown` if the driver task itself failed.
    pub(crate) async fn shutdown(self) -> Result<(), PgConduitError> {
        let Self {
            client,
            registry: _,
            driver,
        } = self;
        drop(client);
        driver
            .await
            .map_err(|e| PgConduitError::Teardown(format!("connection driver failed: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn recorder() -> (RouteCallback, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let callback: RouteCallback = Arc::new(move |payload| {
            let _ = tx.send(payload);
        });
        (callback, rx)
    }

    #[tokio::test]
    async fn dispatch_routes_payloads_in_arrival_order() {
        let registry = Registry::default();
        let (callback, mut rx) = recorder();
        registry.register_route("jobs", callback).unwrap();

        registry.dispatch("jobs", "one");
        registry.dispatch("jobs", "two");
        registry.dispatch("other", "ignored");

        assert_eq!(rx.recv().await.unwrap(), "one");
        assert_eq!(rx.recv().await.unwrap(), "two");
        assert!(
            tokio::time::timeout(Duration::from_millis(50), rx.recv())
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn removed_route_stops_dispatch() {
        let registry = Registry::default();
        let (callback, mut rx) = recorder();
        let token = registry.register_route("jobs", callback).unwrap();

        registry.dispatch("jobs", "before");
        assert_eq!(rx.recv().await.unwrap(), "before");

        registry.remove_route("jobs", token);
        registry.dispatch("jobs", "after");
        // removal drops the route; once its worker drains, the recorder's
        // sender goes with it and the receiver closes with nothing pending
        assert!(rx.recv().await.is_none());

        // removing again is a no-op
        registry.remove_route("jobs", token);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn one_channel_delivers_in_arrival_order_across_worker_threads() {
        let registry = Registry::default();
        let (callback, mut rx) = recorder();
        registry.register_route("jobs", callback).unwrap();

        for n in 0..500 {
            registry.dispatch("jobs", &n.to_string());
        }
        for n in 0..500 {
            assert_eq!(rx.recv().await.unwrap(), n.to_string());
        }
    }

    #[tokio::test]
    async fn second_registration_per_channel_is_rejected() {
        let registry = Registry::default();
        let (first, _rx) = recorder();
        let (second, _rx2) = recorder();
        registry.register_route("jobs", first).unwrap();
        let err = registry.register_route("jobs", second).unwrap_err();
        assert!(matches!(err, PgConduitError::ListenStatement(_)));
    }

    #[tokio::test]
    async fn escalation_fires_exactly_once() {
        let registry = Registry::default();
        let (callback, mut rx) = recorder();
        registry.attach_observer(callback).unwrap();

        registry.escalate("socket reset".to_string());
        registry.escalate("second error".to_string());

        assert_eq!(rx.recv().await.unwrap(), "socket reset");
        // the observer was consumed by the first escalation: its callback
        // (and the recorder's sender) is gone, so the channel closes instead
        // of carrying "second error"
        assert!(rx.recv().await.is_none());
        assert!(registry.is_lost());
    }

    #[tokio::test]
    async fn escalation_without_observer_only_marks_lost() {
        let registry = Registry::default();
        registry.escalate("nobody listening".to_string());
        assert!(registry.is_lost());
    }

    #[test]
    fn observer_is_exclusive_and_detach_is_token_checked() {
        let registry = Registry::default();
        let (first, _rx) = recorder();
        let token = registry.attach_observer(first).unwrap();

        let noop: ConnectionLostCallback = Arc::new(|_| {});
        assert!(registry.attach_observer(Arc::clone(&noop)).is_err());

        registry.detach_observer(token);
        // detached: a fresh observer may now attach, and the stale token is a no-op
        let second = registry.attach_observer(noop).unwrap();
        registry.detach_observer(token);
        registry.detach_observer(second);
    }

    #[tokio::test]
    async fn reset_clears_routes_observer_and_lost_flag() {
        let registry = Registry::default();
        let noop: RouteCallback = Arc::new(|_| {});
        registry.register_route("jobs", Arc::clone(&noop)).unwrap();
        registry.attach_observer(noop).unwrap();
        registry.escalate("gone".to_string());

        registry.reset();
        assert!(!registry.is_lost());
        let fresh: RouteCallback = Arc::new(|_| {});
        registry.register_route("jobs", Arc::clone(&fresh)).unwrap();
        registry.attach_observer(fresh).unwrap();
    }
}
