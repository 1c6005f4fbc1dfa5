// Session Client - one handle over the store and every coordinator
// Provides app initialization (parallel first load) and periodic background sync

use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::coordinator::{
    CommentCoordinator, ConnectionCoordinator, CoordinatorContext, NetworkCoordinator,
    PostCoordinator, PreferencesCoordinator, StatusReport, UserCoordinator,
};
use crate::error::{AppError, AppResult};
use crate::gateway::RemoteProcedureGateway;
use crate::models::{NetworkGraph, Post, Preferences, User};
use crate::store::{Store, StoreSnapshot};

/// What the first load brought in
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InitSummary {
    pub user: Option<User>,
    pub users: usize,
    pub posts: usize,
    pub nodes: usize,
    pub preferences: Option<Preferences>,
}

/// Clears the initializing flag however `initialize` exits
struct InitializingGuard<'a>(&'a AtomicBool);

impl Drop for InitializingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[derive(Debug)]
pub struct SocialClient {
    ctx: Arc<CoordinatorContext>,
    posts: PostCoordinator,
    comments: CommentCoordinator,
    users: UserCoordinator,
    connections: ConnectionCoordinator,
    network: NetworkCoordinator,
    preferences: PreferencesCoordinator,
    initialized: AtomicBool,
    initializing: AtomicBool,
    sync_enabled: AtomicBool,
    sync_task: Mutex<Option<JoinHandle<()>>>,
}

impl SocialClient {
    pub fn new(gateway: Arc<dyn RemoteProcedureGateway>) -> Self {
        Self::with_store(Store::new(), gateway)
    }

    pub fn with_store(store: Store, gateway: Arc<dyn RemoteProcedureGateway>) -> Self {
        let ctx = Arc::new(CoordinatorContext::new(store, gateway));
        Self {
            posts: PostCoordinator::new(ctx.clone()),
            comments: CommentCoordinator::new(ctx.clone()),
            users: UserCoordinator::new(ctx.clone()),
            connections: ConnectionCoordinator::new(ctx.clone()),
            network: NetworkCoordinator::new(ctx.clone()),
            preferences: PreferencesCoordinator::new(ctx.clone()),
            ctx,
            initialized: AtomicBool::new(false),
            initializing: AtomicBool::new(false),
            sync_enabled: AtomicBool::new(false),
            sync_task: Mutex::new(None),
        }
    }

    pub fn store(&self) -> &Store {
        &self.ctx.store
    }

    pub fn snapshot(&self) -> Arc<StoreSnapshot> {
        self.ctx.store.snapshot()
    }

    pub fn context(&self) -> &Arc<CoordinatorContext> {
        &self.ctx
    }

    pub fn posts(&self) -> &PostCoordinator {
        &self.posts
    }

    pub fn comments(&self) -> &CommentCoordinator {
        &self.comments
    }

    pub fn users(&self) -> &UserCoordinator {
        &self.users
    }

    pub fn connections(&self) -> &ConnectionCoordinator {
        &self.connections
    }

    pub fn network(&self) -> &NetworkCoordinator {
        &self.network
    }

    pub fn preferences(&self) -> &PreferencesCoordinator {
        &self.preferences
    }

    pub fn statuses(&self) -> Vec<StatusReport> {
        vec![
            self.posts.status(),
            self.comments.status(),
            self.users.status(),
            self.connections.status(),
            self.network.status(),
            self.preferences.status(),
        ]
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    pub fn is_initializing(&self) -> bool {
        self.initializing.load(Ordering::SeqCst)
    }

    /// Load the signed-in user, the user directory, the feed, the graph and the
    /// preferences in parallel. Returns `None` when the client is already
    /// initialized or another initialization is running.
    #[instrument(skip(self))]
    pub async fn initialize(&self, user_id: &str) -> AppResult<Option<InitSummary>> {
        if self.is_initialized()
            || self
                .initializing
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
        {
            debug!("initialization skipped for {}", user_id);
            return Ok(None);
        }
        let _initializing = InitializingGuard(&self.initializing);

        let (user, users, (posts, network), preferences) = futures::join!(
            self.users.fetch_user(user_id),
            self.users.fetch_all_users(),
            self.fetch_feed_and_graph(),
            self.preferences.fetch_preferences(Some(user_id)),
        );

        // Each failed fetch has already recorded its message on the store.
        let summary = InitSummary {
            user: user?,
            users: users?.len(),
            posts: posts?.len(),
            nodes: network?.map(|graph| graph.nodes().len()).unwrap_or_default(),
            preferences: preferences?,
        };

        self.initialized.store(true, Ordering::SeqCst);
        info!(
            "initialized for {}: {} posts, {} nodes",
            user_id, summary.posts, summary.nodes
        );
        Ok(Some(summary))
    }

    /// The graph is reconciled against the feed, so it loads second
    async fn fetch_feed_and_graph(
        &self,
    ) -> (AppResult<Vec<Post>>, AppResult<Option<NetworkGraph>>) {
        let posts = self.posts.fetch_posts().await;
        let network = self.network.fetch_network_data().await;
        (posts, network)
    }

    pub fn is_sync_enabled(&self) -> bool {
        self.sync_enabled.load(Ordering::SeqCst)
    }

    /// Refresh posts and the graph every `interval` until `stop_sync`.
    /// Restarting replaces the running task.
    pub fn start_sync(self: &Arc<Self>, interval: Duration) -> AppResult<()> {
        if interval.is_zero() {
            return Err(AppError::Validation(
                "sync interval must be greater than zero".to_string(),
            ));
        }

        let client: Weak<Self> = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(client) = client.upgrade() else {
                    break;
                };
                if let Err(e) = client.sync_now().await {
                    warn!("background sync failed: {}", e);
                }
            }
        });

        self.sync_enabled.store(true, Ordering::SeqCst);
        let previous = self
            .sync_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }
        info!("background sync started every {}ms", interval.as_millis());
        Ok(())
    }

    pub fn stop_sync(&self) {
        self.sync_enabled.store(false, Ordering::SeqCst);
        let running = self
            .sync_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = running {
            handle.abort();
            info!("background sync stopped");
        }
    }

    /// One sync pass. Does nothing unless sync is enabled; returns whether it ran.
    #[instrument(skip(self))]
    pub async fn sync_now(&self) -> AppResult<bool> {
        if !self.is_sync_enabled() {
            return Ok(false);
        }
        let (posts, network) = self.fetch_feed_and_graph().await;
        posts?;
        network?;
        debug!("sync pass complete");
        Ok(true)
    }
}

impl Drop for SocialClient {
    fn drop(&mut self) {
        let running = self
            .sync_task
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = running {
            handle.abort();
        }
    }
}
