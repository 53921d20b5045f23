//! CalMesh Server - calendar federation in a single binary
//!
//! Wires the whole pipeline: SQLite store, actor router, sync and write
//! queues with their consumers, the reconcile worker, the periodic sweeps
//! (channel renewal, hold expiry, daily reconcile), and the HTTP RPC
//! surface.
//!
//! # Quick start
//!
//! ```bash
//! # Start with defaults (localhost:8080, ./calmesh.db)
//! CALMESH_MASTER_KEY=dev-secret calmesh-server
//!
//! # Custom port and database
//! calmesh-server --port 9090 --db-path /var/lib/calmesh/calmesh.db
//!
//! # With an external constraint solver
//! CALMESH_SOLVER_ENDPOINT=https://solver.internal/solve calmesh-server
//! ```

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use calmesh_account::RENEWAL_MARGIN_MILLIS;
use calmesh_api::{api_router, AppState};
use calmesh_crypto::MasterKey;
use calmesh_provider::http::OAuthClientConfig;
use calmesh_provider::HttpProviderClient;
use calmesh_queue::{Queue, RetryPolicy};
use calmesh_reconcile::{ReconcileReason, ReconcileRequest, ReconcileWorker};
use calmesh_registry::{ActorRouter, RouterDeps};
use calmesh_sched::SolverService;
use calmesh_store::{Store, StoreConfig};
use calmesh_sync::SyncConsumer;
use calmesh_types::time;
use calmesh_write::WriteConsumer;

/// CalMesh Server - multi-account calendar federation
#[derive(Parser, Debug)]
#[command(
    name = "calmesh-server",
    about = "Federate Google and Microsoft calendars into one canonical graph",
    version
)]
struct Args {
    /// Host to bind to
    #[arg(long, default_value = "0.0.0.0", env = "CALMESH_HOST")]
    host: String,

    /// Port to listen on
    #[arg(short, long, default_value = "8080", env = "CALMESH_PORT")]
    port: u16,

    /// SQLite database path
    #[arg(long, default_value = "calmesh.db", env = "CALMESH_DB_PATH")]
    db_path: String,

    /// Master key secret (raw 32-byte hex/base64, or any passphrase)
    #[arg(long, env = "CALMESH_MASTER_KEY", hide_env_values = true)]
    master_key: String,

    /// Public webhook URL registered with providers
    #[arg(
        long,
        default_value = "http://localhost:8080/webhooks",
        env = "CALMESH_WEBHOOK_URL"
    )]
    webhook_url: String,

    /// External constraint-solver endpoint (optional)
    #[arg(long, env = "CALMESH_SOLVER_ENDPOINT")]
    solver_endpoint: Option<String>,

    /// Google OAuth client id
    #[arg(long, default_value = "", env = "CALMESH_GOOGLE_CLIENT_ID")]
    google_client_id: String,

    /// Google OAuth client secret
    #[arg(long, default_value = "", env = "CALMESH_GOOGLE_CLIENT_SECRET", hide_env_values = true)]
    google_client_secret: String,

    /// Microsoft OAuth client id
    #[arg(long, default_value = "", env = "CALMESH_MS_CLIENT_ID")]
    ms_client_id: String,

    /// Microsoft OAuth client secret
    #[arg(long, default_value = "", env = "CALMESH_MS_CLIENT_SECRET", hide_env_values = true)]
    ms_client_secret: String,

    /// Seconds between hold-expiry sweeps
    #[arg(long, default_value = "60", env = "CALMESH_HOLD_SWEEP_SECS")]
    hold_sweep_secs: u64,

    /// Seconds between channel/subscription renewal sweeps
    #[arg(long, default_value = "3600", env = "CALMESH_RENEWAL_SWEEP_SECS")]
    renewal_sweep_secs: u64,

    /// Seconds between reconcile passes over all accounts
    #[arg(long, default_value = "86400", env = "CALMESH_RECONCILE_SECS")]
    reconcile_secs: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!("Bootstrapping CalMesh...");
    let store = Store::connect(&StoreConfig {
        database_path: args.db_path.clone(),
        max_connections: 5,
    })
    .await?;

    let provider = Arc::new(HttpProviderClient::new(OAuthClientConfig {
        google_client_id: args.google_client_id.clone(),
        google_client_secret: args.google_client_secret.clone(),
        ms_client_id: args.ms_client_id.clone(),
        ms_client_secret: args.ms_client_secret.clone(),
    }));

    let (write_queue, write_runner) = Queue::new();
    let (sync_queue, sync_runner) = Queue::new();

    let router = Arc::new(ActorRouter::new(RouterDeps {
        store: store.clone(),
        master_key: MasterKey::from_secret(&args.master_key),
        tokens: provider.clone(),
        calendar: provider.clone(),
        webhook_url: args.webhook_url.clone(),
        write_queue: write_queue.clone(),
        solver: Arc::new(SolverService::new(args.solver_endpoint.clone())),
    }));

    // Queue consumers: at-least-once with backoff redelivery
    sync_runner.spawn(
        "sync",
        Arc::new(SyncConsumer::new(
            router.clone(),
            provider.clone(),
            sync_queue.clone(),
        )),
        RetryPolicy::default(),
    );
    write_runner.spawn(
        "write",
        Arc::new(WriteConsumer::new(router.clone(), provider.clone())),
        RetryPolicy::default(),
    );

    let reconcile = Arc::new(ReconcileWorker::new(
        router.clone(),
        provider.clone(),
        write_queue.clone(),
    ));

    spawn_hold_sweep(router.clone(), args.hold_sweep_secs);
    spawn_renewal_sweep(router.clone(), args.renewal_sweep_secs);
    spawn_reconcile_cron(router.clone(), reconcile.clone(), args.reconcile_secs);

    let app = api_router(Arc::new(AppState {
        router,
        sync_queue,
        reconcile,
    }));

    let addr = format!("{}:{}", args.host, args.port);
    info!("CalMesh Server running at http://{addr}");
    info!("Health:  http://{addr}/healthz");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

/// Expire overdue holds for every user with linked accounts. Idempotent; a
/// missed tick just reruns on the next one.
fn spawn_hold_sweep(router: Arc<ActorRouter>, interval_secs: u64) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
        loop {
            ticker.tick().await;
            let accounts = match router.active_accounts().await {
                Ok(accounts) => accounts,
                Err(e) => {
                    warn!(error = %e, "Hold sweep could not list accounts");
                    continue;
                }
            };
            let mut users: Vec<_> = accounts.iter().map(|a| a.user_id).collect();
            users.sort_unstable();
            users.dedup();
            for user_id in users {
                match router.user(user_id).expire_overdue_holds(time::now_millis()).await {
                    Ok(0) => {}
                    Ok(expired) => info!(user_id = %user_id, expired, "Expired overdue holds"),
                    Err(e) => warn!(user_id = %user_id, error = %e, "Hold sweep failed"),
                }
            }
        }
    });
}

/// Renew watch channels and Graph subscriptions before they lapse
fn spawn_renewal_sweep(router: Arc<ActorRouter>, interval_secs: u64) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
        loop {
            ticker.tick().await;
            let horizon = time::now_millis() + RENEWAL_MARGIN_MILLIS;

            match router.store().channels().channels_expiring_before(horizon).await {
                Ok(channels) => {
                    for channel in channels {
                        let result = match router.account(channel.account_id).await {
                            Ok(actor) => actor.renew_channel(channel.channel_id.clone()).await.map(|_| ()),
                            Err(e) => Err(e),
                        };
                        if let Err(e) = result {
                            warn!(
                                channel_id = %channel.channel_id,
                                error = %e,
                                "Channel renewal failed"
                            );
                        }
                    }
                }
                Err(e) => warn!(error = %e, "Renewal sweep could not list channels"),
            }

            match router
                .store()
                .channels()
                .subscriptions_expiring_before(horizon)
                .await
            {
                Ok(subscriptions) => {
                    for subscription in subscriptions {
                        let result = match router.account(subscription.account_id).await {
                            Ok(actor) => actor
                                .renew_ms_subscription(subscription.subscription_id.clone())
                                .await
                                .map(|_| ()),
                            Err(e) => Err(e),
                        };
                        if let Err(e) = result {
                            warn!(
                                subscription_id = %subscription.subscription_id,
                                error = %e,
                                "Subscription renewal failed"
                            );
                        }
                    }
                }
                Err(e) => warn!(error = %e, "Renewal sweep could not list subscriptions"),
            }
        }
    });
}

/// Daily drift detection over every active account. Per-account failures
/// are logged; the next tick retries the whole account.
fn spawn_reconcile_cron(
    router: Arc<ActorRouter>,
    reconcile: Arc<ReconcileWorker>,
    interval_secs: u64,
) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
        // The first tick fires immediately; skip it so startup stays quiet
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let accounts = match router.active_accounts().await {
                Ok(accounts) => accounts,
                Err(e) => {
                    error!(error = %e, "Reconcile cron could not list accounts");
                    continue;
                }
            };
            info!(accounts = accounts.len(), "Reconcile pass starting");
            for account in accounts {
                let request = ReconcileRequest {
                    account_id: account.account_id,
                    reason: ReconcileReason::Scheduled,
                    scope: None,
                };
                match reconcile.run(&request).await {
                    Ok(report) if report.is_clean() => {}
                    Ok(report) => info!(
                        account_id = %account.account_id,
                        report = ?report,
                        "Reconcile repaired drift"
                    ),
                    Err(e) => warn!(
                        account_id = %account.account_id,
                        error = %e,
                        "Reconcile failed; will retry next pass"
                    ),
                }
            }
        }
    });
}
