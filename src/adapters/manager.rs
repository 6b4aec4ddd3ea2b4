//! Connection manager
//!
//! Owns one adapter per exchange name and keeps it alive: connects and
//! disconnects on request, watches heartbeats on a fixed interval, reconnects
//! with exponential backoff and restores stream subscriptions afterwards.
//! Also offers batch queries across every connected exchange and fan-out
//! subscriptions tagged with the originating exchange.
//!
//! Locking: the registry lock is only held to look entries up or swap them;
//! every adapter call happens on a cloned `EntryHandle` with the registry
//! released.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use futures_util::future::join_all;
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::adapters::errors::ExchangeResult;
use crate::adapters::factory::{create_adapter, AnyAdapter};
use crate::adapters::settings::AdapterSettings;
use crate::adapters::traits::ExchangeAdapter;
use crate::adapters::types::{
    current_time_ms, AccountInfo, AdapterEvent, Credentials, Order, OrderRequest, Position,
    StreamCallback, StreamMessage, SubscriptionKey, SubscriptionType, Ticker,
};
use crate::config::HealthConfig;
use crate::core::events::{log_event, ManagerEvent, MANAGER_EVENT_CAPACITY};
use crate::core::reconnect::{reconnect_with_backoff, ReconnectOutcome, ReconnectPolicy};
use crate::error::{AppError, Result};

// =============================================================================
// Public types
// =============================================================================

/// Builds an unconnected adapter for an exchange name
pub type AdapterFactory<A> =
    Arc<dyn Fn(&str, &AdapterSettings) -> std::result::Result<A, AppError> + Send + Sync>;

pub type SharedAdapter<A> = Arc<RwLock<A>>;

/// Stream message annotated with the exchange it came from
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaggedMessage {
    pub exchange: String,
    pub message: StreamMessage,
}

pub type TaggedCallback = Arc<dyn Fn(TaggedMessage) + Send + Sync>;

/// Health snapshot of one registered exchange
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExchangeStatus {
    pub name: String,
    pub connected: bool,
    pub ws_connected: bool,
    pub last_heartbeat: u64,
    pub reconnect_attempts: u32,
    pub subscription_count: usize,
    pub reconnecting: bool,
    /// Reconnect attempts exhausted; cleared only by re-adding the exchange
    pub halted: bool,
}

// =============================================================================
// Registry entries
// =============================================================================

#[derive(Default)]
struct ConnectionState {
    connected: AtomicBool,
    /// Health checks apply; cleared by explicit disconnect and auth failures
    monitored: AtomicBool,
    reconnecting: AtomicBool,
    halted: AtomicBool,
    attempts: AtomicU32,
    reconnect_cancel: Mutex<Option<CancellationToken>>,
}

impl ConnectionState {
    fn cancel_reconnect(&self) {
        let token = self
            .reconnect_cancel
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(token) = token {
            token.cancel();
        }
    }

    fn set_reconnect_token(&self, token: Option<CancellationToken>) {
        *self
            .reconnect_cancel
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = token;
    }
}

/// One fan-out consumer on one exchange: the caller's callback and the
/// tagging wrapper handed to the adapter
struct Listener {
    source: TaggedCallback,
    stream: StreamCallback,
}

type SubscriptionMemory = Arc<Mutex<HashMap<SubscriptionKey, Vec<Listener>>>>;

struct ExchangeEntry<A> {
    handle: EntryHandle<A>,
    forwarder: JoinHandle<()>,
}

/// Everything background work needs from an entry, cheap to clone
struct EntryHandle<A> {
    name: String,
    adapter: SharedAdapter<A>,
    credentials: Credentials,
    state: Arc<ConnectionState>,
    subscriptions: SubscriptionMemory,
    generation: u64,
    cancel: CancellationToken,
}

impl<A> Clone for EntryHandle<A> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            adapter: Arc::clone(&self.adapter),
            credentials: self.credentials.clone(),
            state: Arc::clone(&self.state),
            subscriptions: Arc::clone(&self.subscriptions),
            generation: self.generation,
            cancel: self.cancel.clone(),
        }
    }
}

impl<A> EntryHandle<A> {
    fn remembered(&self) -> Vec<(SubscriptionKey, StreamCallback)> {
        self.subscriptions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .flat_map(|(k, listeners)| {
                listeners
                    .iter()
                    .map(move |l| (k.clone(), Arc::clone(&l.stream)))
            })
            .collect()
    }

    fn is_remembered(&self, key: &SubscriptionKey, source: &TaggedCallback) -> bool {
        self.subscriptions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(key)
            .map(|listeners| listeners.iter().any(|l| Arc::ptr_eq(&l.source, source)))
            .unwrap_or(false)
    }

    fn remember(&self, key: SubscriptionKey, source: TaggedCallback, stream: StreamCallback) {
        self.subscriptions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .entry(key)
            .or_default()
            .push(Listener { source, stream });
    }

    fn forget(&self, key: &SubscriptionKey) {
        self.subscriptions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(key);
    }
}

fn emit(events: &broadcast::Sender<ManagerEvent>, event: ManagerEvent) {
    log_event(&event);
    let _ = events.send(event);
}

fn normalize_name(name: &str) -> String {
    name.trim().to_ascii_lowercase()
}

// =============================================================================
// ConnectionManager
// =============================================================================

struct ManagerInner<A> {
    factory: AdapterFactory<A>,
    health: HealthConfig,
    registry: RwLock<HashMap<String, ExchangeEntry<A>>>,
    events: broadcast::Sender<ManagerEvent>,
    shutdown: CancellationToken,
    generation: AtomicU64,
    monitor: Mutex<Option<JoinHandle<()>>>,
}

/// Registry of exchange connections; clones share the same registry
pub struct ConnectionManager<A = AnyAdapter> {
    inner: Arc<ManagerInner<A>>,
}

impl<A> Clone for ConnectionManager<A> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl ConnectionManager<AnyAdapter> {
    /// Manager building real exchange adapters through `create_adapter`
    pub fn new(health: HealthConfig) -> Self {
        Self::with_factory(health, create_adapter)
    }
}

impl<A: ExchangeAdapter + 'static> ConnectionManager<A> {
    pub fn with_factory<F>(health: HealthConfig, factory: F) -> Self
    where
        F: Fn(&str, &AdapterSettings) -> std::result::Result<A, AppError> + Send + Sync + 'static,
    {
        let (events, _) = broadcast::channel(MANAGER_EVENT_CAPACITY);
        Self {
            inner: Arc::new(ManagerInner {
                factory: Arc::new(factory),
                health,
                registry: RwLock::new(HashMap::new()),
                events,
                shutdown: CancellationToken::new(),
                generation: AtomicU64::new(0),
                monitor: Mutex::new(None),
            }),
        }
    }

    pub fn health_config(&self) -> &HealthConfig {
        &self.inner.health
    }

    /// New receiver on the manager event bus
    pub fn subscribe_events(&self) -> broadcast::Receiver<ManagerEvent> {
        self.inner.events.subscribe()
    }

    async fn handle(&self, name: &str) -> Result<EntryHandle<A>> {
        let name = normalize_name(name);
        self.inner
            .registry
            .read()
            .await
            .get(&name)
            .map(|entry| entry.handle.clone())
            .ok_or(AppError::ExchangeNotFound(name))
    }

    async fn handles(&self) -> Vec<EntryHandle<A>> {
        let mut handles: Vec<_> = self
            .inner
            .registry
            .read()
            .await
            .values()
            .map(|entry| entry.handle.clone())
            .collect();
        handles.sort_by(|a, b| a.name.cmp(&b.name));
        handles
    }

    async fn connected_handles(&self) -> Vec<EntryHandle<A>> {
        self.handles()
            .await
            .into_iter()
            .filter(|h| h.state.connected.load(Ordering::SeqCst))
            .collect()
    }

    // -------------------------------------------------------------------------
    // Registration
    // -------------------------------------------------------------------------

    /// Register `name` with default adapter settings
    pub async fn add_exchange(
        &self,
        name: &str,
        credentials: Credentials,
        auto_connect: bool,
    ) -> Result<SharedAdapter<A>> {
        self.add_exchange_with_settings(name, credentials, AdapterSettings::default(), auto_connect)
            .await
    }

    /// Register `name`, replacing and tearing down any previous entry
    ///
    /// Credentials are validated before anything is replaced. A replaced entry
    /// loses its halted state, subscriptions and reconnect loop.
    pub async fn add_exchange_with_settings(
        &self,
        name: &str,
        credentials: Credentials,
        settings: AdapterSettings,
        auto_connect: bool,
    ) -> Result<SharedAdapter<A>> {
        let name = normalize_name(name);
        let adapter = (self.inner.factory)(&name, &settings)?;
        adapter.validate_credentials(&credentials)?;

        let previous = self.inner.registry.write().await.remove(&name);
        if let Some(old) = previous {
            info!(exchange = %name, generation = old.handle.generation, "Replacing existing exchange entry");
            self.teardown(old).await;
        }

        let events_rx = adapter.events();
        let handle = EntryHandle {
            name: name.clone(),
            adapter: Arc::new(RwLock::new(adapter)),
            credentials,
            state: Arc::new(ConnectionState::default()),
            subscriptions: Arc::new(Mutex::new(HashMap::new())),
            generation: self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1,
            cancel: self.inner.shutdown.child_token(),
        };
        let forwarder = spawn_forwarder(handle.clone(), events_rx, self.inner.events.clone());
        let adapter = Arc::clone(&handle.adapter);

        let displaced = self.inner.registry.write().await.insert(
            name.clone(),
            ExchangeEntry {
                handle: handle.clone(),
                forwarder,
            },
        );
        if let Some(old) = displaced {
            self.teardown(old).await;
        }
        info!(exchange = %name, generation = handle.generation, "Exchange registered");

        if auto_connect {
            self.connect_exchange(&name).await?;
        }
        Ok(adapter)
    }

    /// Disconnect and forget `name`
    pub async fn remove_exchange(&self, name: &str) -> Result<()> {
        let name = normalize_name(name);
        let removed = self.inner.registry.write().await.remove(&name);
        let entry = removed.ok_or_else(|| AppError::ExchangeNotFound(name.clone()))?;
        let was_connected = entry.handle.state.connected.load(Ordering::SeqCst);
        self.teardown(entry).await;
        if was_connected {
            emit(
                &self.inner.events,
                ManagerEvent::Disconnected {
                    exchange: name.clone(),
                    reason: Some("removed".into()),
                },
            );
        }
        info!(exchange = %name, "Exchange removed");
        Ok(())
    }

    async fn teardown(&self, entry: ExchangeEntry<A>) {
        let handle = entry.handle;
        handle.state.monitored.store(false, Ordering::SeqCst);
        handle.state.cancel_reconnect();
        handle.cancel.cancel();
        entry.forwarder.abort();

        let result = handle.adapter.write().await.disconnect().await;
        if let Err(e) = result {
            warn!(exchange = %handle.name, error = %e, "Disconnect during teardown failed");
        }
        handle.state.connected.store(false, Ordering::SeqCst);
    }

    // -------------------------------------------------------------------------
    // Connect / disconnect
    // -------------------------------------------------------------------------

    /// Connect a registered exchange
    ///
    /// Supersedes any reconnect loop in flight. On a retryable failure the
    /// entry stays monitored so the health monitor keeps trying; an
    /// authentication failure leaves it disconnected and unmonitored. A halted
    /// entry stays halted: only re-adding it resumes automatic reconnects.
    pub async fn connect_exchange(&self, name: &str) -> Result<()> {
        let handle = self.handle(name).await?;
        handle.state.cancel_reconnect();
        let result = handle
            .adapter
            .write()
            .await
            .connect(&handle.credentials)
            .await;

        match result {
            Ok(()) => {
                let state = &handle.state;
                state.connected.store(true, Ordering::SeqCst);
                state.monitored.store(true, Ordering::SeqCst);
                state.attempts.store(0, Ordering::SeqCst);
                restore_subscriptions(&handle).await;
                emit(
                    &self.inner.events,
                    ManagerEvent::Connected {
                        exchange: handle.name.clone(),
                    },
                );
                Ok(())
            }
            Err(e) => {
                handle.state.connected.store(false, Ordering::SeqCst);
                if e.is_fatal() {
                    handle.state.monitored.store(false, Ordering::SeqCst);
                    error!(exchange = %handle.name, error = %e, "Authentication failed, automatic reconnect disabled");
                } else {
                    handle.state.monitored.store(true, Ordering::SeqCst);
                    warn!(exchange = %handle.name, error = %e, "Connect failed, health monitor will retry");
                }
                emit(&self.inner.events, ManagerEvent::error(&handle.name, e.to_string()));
                Err(e.into())
            }
        }
    }

    /// Disconnect without forgetting; health checks stop for this entry
    pub async fn disconnect_exchange(&self, name: &str) -> Result<()> {
        let handle = self.handle(name).await?;
        handle.state.monitored.store(false, Ordering::SeqCst);
        handle.state.cancel_reconnect();

        let result = handle.adapter.write().await.disconnect().await;
        let was_connected = handle.state.connected.swap(false, Ordering::SeqCst);
        result?;

        if was_connected {
            emit(
                &self.inner.events,
                ManagerEvent::Disconnected {
                    exchange: handle.name.clone(),
                    reason: None,
                },
            );
        }
        Ok(())
    }

    /// Connect every registered exchange; failures are isolated per name
    pub async fn connect_all(&self) -> HashMap<String, bool> {
        let names: Vec<String> = self.handles().await.into_iter().map(|h| h.name).collect();
        let results = join_all(names.into_iter().map(|name| async move {
            let ok = self.connect_exchange(&name).await.is_ok();
            (name, ok)
        }))
        .await;
        results.into_iter().collect()
    }

    /// Disconnect every registered exchange; failures are isolated per name
    pub async fn disconnect_all(&self) -> HashMap<String, bool> {
        let names: Vec<String> = self.handles().await.into_iter().map(|h| h.name).collect();
        let results = join_all(names.into_iter().map(|name| async move {
            let result = self.disconnect_exchange(&name).await;
            if let Err(e) = &result {
                warn!(exchange = %name, error = %e, "Disconnect failed");
                emit(&self.inner.events, ManagerEvent::error(&name, e.to_string()));
            }
            (name, result.is_ok())
        }))
        .await;
        results.into_iter().collect()
    }

    // -------------------------------------------------------------------------
    // Lookup & status
    // -------------------------------------------------------------------------

    pub async fn get_exchange(&self, name: &str) -> Option<SharedAdapter<A>> {
        self.handle(name).await.ok().map(|h| h.adapter)
    }

    /// Names of connected exchanges, sorted
    pub async fn get_connected_exchanges(&self) -> Vec<String> {
        self.connected_handles()
            .await
            .into_iter()
            .map(|h| h.name)
            .collect()
    }

    pub async fn get_all_exchange_statuses(&self) -> Vec<ExchangeStatus> {
        let mut statuses = Vec::new();
        for handle in self.handles().await {
            let (ws_connected, last_heartbeat, subscription_count) = {
                let adapter = handle.adapter.read().await;
                (
                    adapter.is_ws_connected(),
                    adapter.last_heartbeat(),
                    adapter.subscription_count(),
                )
            };
            let state = &handle.state;
            statuses.push(ExchangeStatus {
                name: handle.name.clone(),
                connected: state.connected.load(Ordering::SeqCst),
                ws_connected,
                last_heartbeat,
                reconnect_attempts: state.attempts.load(Ordering::SeqCst),
                subscription_count,
                reconnecting: state.reconnecting.load(Ordering::SeqCst),
                halted: state.halted.load(Ordering::SeqCst),
            });
        }
        statuses
    }

    // -------------------------------------------------------------------------
    // Batch queries
    // -------------------------------------------------------------------------

    /// Account info from every connected exchange; failures are omitted
    pub async fn get_all_accounts_info(&self) -> HashMap<String, AccountInfo> {
        let handles = self.connected_handles().await;
        let results = join_all(handles.into_iter().map(|h| async move {
            let result = h.adapter.read().await.get_account_info().await;
            (h.name, result)
        }))
        .await;
        collect_batch("get_account_info", results)
    }

    pub async fn get_all_positions(&self, symbol: Option<&str>) -> HashMap<String, Vec<Position>> {
        let handles = self.connected_handles().await;
        let results = join_all(handles.into_iter().map(|h| async move {
            let result = h.adapter.read().await.get_positions(symbol).await;
            (h.name, result)
        }))
        .await;
        collect_batch("get_positions", results)
    }

    pub async fn get_all_tickers(&self, symbol: &str) -> HashMap<String, Ticker> {
        let handles = self.connected_handles().await;
        let results = join_all(handles.into_iter().map(|h| async move {
            let result = h.adapter.read().await.get_ticker(symbol).await;
            (h.name, result)
        }))
        .await;
        collect_batch("get_ticker", results)
    }

    // -------------------------------------------------------------------------
    // Orders
    // -------------------------------------------------------------------------

    async fn connected_handle(&self, exchange: &str) -> Result<EntryHandle<A>> {
        let handle = self.handle(exchange).await?;
        if !handle.state.connected.load(Ordering::SeqCst) {
            return Err(AppError::ExchangeNotConnected(handle.name));
        }
        Ok(handle)
    }

    pub async fn create_order(&self, exchange: &str, request: OrderRequest) -> Result<Order> {
        let handle = self.connected_handle(exchange).await?;
        let order = handle.adapter.read().await.create_order(request).await?;
        info!(
            exchange = %handle.name,
            order_id = %order.id,
            symbol = %order.symbol,
            side = %order.side,
            amount = order.amount,
            status = ?order.status,
            "Order created"
        );
        Ok(order)
    }

    pub async fn cancel_order(&self, exchange: &str, order_id: &str, symbol: &str) -> Result<Order> {
        let handle = self.connected_handle(exchange).await?;
        let order = handle
            .adapter
            .read()
            .await
            .cancel_order(order_id, symbol)
            .await?;
        info!(exchange = %handle.name, order_id = %order_id, "Order cancelled");
        Ok(order)
    }

    // -------------------------------------------------------------------------
    // Fan-out subscriptions
    // -------------------------------------------------------------------------

    /// Subscribe on every connected exchange
    ///
    /// Messages reach `callback` tagged with their exchange. Several callbacks
    /// may share one `(kind, symbol)` stream; each is remembered per exchange
    /// and restored after a reconnect. Returns, per exchange that accepted
    /// it, whether a new stream subscription was made. Passing a callback
    /// that is already subscribed is a no-op reported as `false`.
    pub async fn subscribe_to_all_exchanges(
        &self,
        kind: SubscriptionType,
        symbol: &str,
        callback: TaggedCallback,
    ) -> HashMap<String, bool> {
        let key = SubscriptionKey::new(kind, symbol);
        let handles = self.connected_handles().await;
        let results = join_all(handles.into_iter().map(|h| {
            let callback = Arc::clone(&callback);
            let key = key.clone();
            async move {
                if h.is_remembered(&key, &callback) {
                    return (h.name, Ok(false));
                }
                let exchange = h.name.clone();
                let source = Arc::clone(&callback);
                let tagged: StreamCallback = Arc::new(move |message| {
                    callback(TaggedMessage {
                        exchange: exchange.clone(),
                        message,
                    })
                });
                let result = h
                    .adapter
                    .write()
                    .await
                    .subscribe(kind, &key.symbol, Arc::clone(&tagged))
                    .await;
                if result.is_ok() {
                    h.remember(key, source, tagged);
                }
                (h.name, result)
            }
        }))
        .await;
        collect_batch("subscribe", results)
    }

    /// Unsubscribe `(kind, symbol)` everywhere and stop restoring it
    pub async fn unsubscribe_from_all_exchanges(
        &self,
        kind: SubscriptionType,
        symbol: &str,
    ) -> HashMap<String, bool> {
        let key = SubscriptionKey::new(kind, symbol);
        let handles = self.handles().await;
        for handle in &handles {
            handle.forget(&key);
        }
        let connected = handles
            .into_iter()
            .filter(|h| h.state.connected.load(Ordering::SeqCst));
        let results = join_all(connected.map(|h| async move {
            let result = h.adapter.write().await.unsubscribe(kind, symbol).await;
            (h.name, result)
        }))
        .await;
        collect_batch("unsubscribe", results)
    }

    // -------------------------------------------------------------------------
    // Health monitoring
    // -------------------------------------------------------------------------

    /// Run one health pass; returns the exchanges a reconnect was started for
    ///
    /// An entry is checked only while monitored, not reconnecting and not
    /// halted. It is unhealthy when the adapter reports its REST session or
    /// its market-data socket down, or its last heartbeat is older than twice
    /// the check interval.
    pub async fn check_health(&self) -> Vec<String> {
        let stale_ms = self.inner.health.stale_after().as_millis() as u64;
        let mut started = Vec::new();

        for handle in self.handles().await {
            let state = &handle.state;
            if !state.monitored.load(Ordering::SeqCst)
                || state.reconnecting.load(Ordering::SeqCst)
                || state.halted.load(Ordering::SeqCst)
            {
                continue;
            }

            let (alive, ws_alive, heartbeat) = {
                let adapter = handle.adapter.read().await;
                (
                    adapter.is_connected(),
                    adapter.is_ws_connected(),
                    adapter.last_heartbeat(),
                )
            };
            let age = current_time_ms().saturating_sub(heartbeat);
            if alive && ws_alive && heartbeat > 0 && age <= stale_ms {
                debug!(exchange = %handle.name, heartbeat_age_ms = age, "Healthy");
                continue;
            }

            let reason = if !alive {
                "adapter disconnected".to_string()
            } else if !ws_alive {
                "websocket down".to_string()
            } else {
                format!("heartbeat stale ({} ms)", age)
            };
            warn!(exchange = %handle.name, reason = %reason, "Unhealthy connection detected");
            if self.spawn_reconnect(handle.clone(), reason) {
                started.push(handle.name.clone());
            }
        }
        started
    }

    fn spawn_reconnect(&self, handle: EntryHandle<A>, reason: String) -> bool {
        let state = Arc::clone(&handle.state);
        if state
            .reconnecting
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }
        let token = handle.cancel.child_token();
        state.set_reconnect_token(Some(token.clone()));

        let events = self.inner.events.clone();
        let policy = ReconnectPolicy::from(&self.inner.health);

        // Before spawning, so a connect that supersedes the loop wins
        if state.connected.swap(false, Ordering::SeqCst) {
            emit(
                &events,
                ManagerEvent::Disconnected {
                    exchange: handle.name.clone(),
                    reason: Some(reason),
                },
            );
        }

        tokio::spawn(async move {
            let name = handle.name.clone();
            let outcome = reconnect_with_backoff(
                &handle.adapter,
                &handle.credentials,
                policy,
                &token,
                |attempt, delay| {
                    state.attempts.store(attempt, Ordering::SeqCst);
                    emit(
                        &events,
                        ManagerEvent::Reconnecting {
                            exchange: name.clone(),
                            attempt,
                            delay_ms: delay.as_millis() as u64,
                        },
                    );
                },
            )
            .await;

            match outcome {
                ReconnectOutcome::Reconnected { .. }
                    if token.is_cancelled() || !state.monitored.load(Ordering::SeqCst) =>
                {
                    debug!(exchange = %name, "Reconnect superseded, result discarded");
                }
                ReconnectOutcome::Reconnected { attempts } => {
                    state.connected.store(true, Ordering::SeqCst);
                    state.attempts.store(0, Ordering::SeqCst);
                    restore_subscriptions(&handle).await;
                    emit(&events, ManagerEvent::Reconnected { exchange: name, attempts });
                }
                ReconnectOutcome::Exhausted { attempts, reason } => {
                    state.halted.store(true, Ordering::SeqCst);
                    emit(
                        &events,
                        ManagerEvent::ReconnectFailed {
                            exchange: name,
                            attempts,
                            reason,
                        },
                    );
                }
                ReconnectOutcome::Fatal { attempts, error } => {
                    state.monitored.store(false, Ordering::SeqCst);
                    error!(exchange = %name, error = %error, "Authentication rejected during reconnect");
                    emit(
                        &events,
                        ManagerEvent::ReconnectFailed {
                            exchange: name,
                            attempts,
                            reason: error.to_string(),
                        },
                    );
                }
                ReconnectOutcome::Cancelled => {
                    debug!(exchange = %name, "Reconnect cancelled");
                }
            }

            state.set_reconnect_token(None);
            state.reconnecting.store(false, Ordering::SeqCst);
        });
        true
    }

    /// Start the periodic health check; replaces a previously started monitor
    pub fn start_health_monitor(&self) {
        let manager = self.clone();
        let token = self.inner.shutdown.child_token();
        let interval = self.inner.health.check_interval();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // First tick completes immediately
            ticker.tick().await;
            info!(interval_secs = interval.as_secs(), "Health monitor started");

            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        info!("Health monitor shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        manager.check_health().await;
                    }
                }
            }
        });

        let previous = self
            .inner
            .monitor
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    /// Stop the health monitor and every reconnect loop, then disconnect all
    pub async fn shutdown(&self) {
        info!("Connection manager shutting down");
        self.inner.shutdown.cancel();
        let monitor = self
            .inner
            .monitor
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(monitor) = monitor {
            let _ = monitor.await;
        }
        self.disconnect_all().await;
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn collect_batch<T>(operation: &str, results: Vec<(String, ExchangeResult<T>)>) -> HashMap<String, T> {
    results
        .into_iter()
        .filter_map(|(name, result)| match result {
            Ok(value) => Some((name, value)),
            Err(e) => {
                warn!(exchange = %name, operation = operation, error = %e, "Batch query failed, excluded");
                None
            }
        })
        .collect()
}

/// Re-send every remembered subscription after a (re)connect
async fn restore_subscriptions<A: ExchangeAdapter>(handle: &EntryHandle<A>) {
    let remembered = handle.remembered();
    if remembered.is_empty() {
        return;
    }
    let mut adapter = handle.adapter.write().await;
    for (key, callback) in remembered {
        match adapter.subscribe(key.kind, &key.symbol, callback).await {
            Ok(_) => debug!(exchange = %handle.name, key = %key, "Subscription restored"),
            Err(e) => warn!(exchange = %handle.name, key = %key, error = %e, "Subscription restore failed"),
        }
    }
}

/// Translate adapter events onto the manager bus
fn spawn_forwarder<A: ExchangeAdapter + 'static>(
    handle: EntryHandle<A>,
    mut events_rx: broadcast::Receiver<AdapterEvent>,
    events: broadcast::Sender<ManagerEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let received = tokio::select! {
                _ = handle.cancel.cancelled() => break,
                received = events_rx.recv() => received,
            };
            match received {
                Ok(AdapterEvent::WsError { message, .. }) => emit(
                    &events,
                    ManagerEvent::WsError {
                        exchange: handle.name.clone(),
                        message,
                    },
                ),
                Ok(AdapterEvent::Disconnected { .. }) => {
                    let state = &handle.state;
                    if !state.monitored.load(Ordering::SeqCst)
                        || state.reconnecting.load(Ordering::SeqCst)
                    {
                        continue;
                    }
                    // The event may predate a reconnect that already
                    // succeeded; judge by the adapter as it is now
                    let live = {
                        let adapter = handle.adapter.read().await;
                        adapter.is_connected() && adapter.is_ws_connected()
                    };
                    if live {
                        debug!(exchange = %handle.name, "Stale disconnect event ignored");
                        continue;
                    }
                    if state.connected.swap(false, Ordering::SeqCst) {
                        emit(
                            &events,
                            ManagerEvent::Disconnected {
                                exchange: handle.name.clone(),
                                reason: Some("connection lost".into()),
                            },
                        );
                    }
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    debug!(exchange = %handle.name, skipped = skipped, "Adapter event receiver lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}
