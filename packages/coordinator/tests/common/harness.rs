//! Postgres harness for integration tests.
//!
//! One container is started for the whole test binary and migrated once.
//! Tests isolate themselves by using unique lock names and tracker names.
//! These tests need Docker and are `#[ignore]`d by default:
//!
//! ```text
//! cargo test -p coordinator -- --ignored
//! ```

use anyhow::{Context, Result};
use coordinator::Database;
use sqlx::postgres::{PgPool, PgPoolOptions};
use test_context::AsyncTestContext;
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;
use uuid::Uuid;

struct SharedPostgres {
    db_url: String,
    // Keep the container alive for the entire test run
    _postgres: ContainerAsync<Postgres>,
}

static SHARED_POSTGRES: OnceCell<SharedPostgres> = OnceCell::const_new();

impl SharedPostgres {
    async fn init() -> Result<Self> {
        // Run tests with: RUST_LOG=coordinator=debug cargo test -- --ignored --nocapture
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();

        let postgres = Postgres::default()
            .with_tag("16")
            .start()
            .await
            .context("Failed to start Postgres container")?;

        let host = postgres.get_host().await?;
        let port = postgres.get_host_port_ipv4(5432).await?;
        let db_url = format!("postgresql://postgres:postgres@{}:{}/postgres", host, port);

        let db = Database::connect(&db_url)
            .await
            .context("Failed to connect to Postgres for migrations")?;
        db.migrate().await.context("Failed to run migrations")?;

        Ok(Self {
            db_url,
            _postgres: postgres,
        })
    }

    async fn get() -> &'static Self {
        SHARED_POSTGRES
            .get_or_init(|| async {
                Self::init()
                    .await
                    .expect("Failed to initialize shared Postgres container")
            })
            .await
    }
}

/// Per-test handle on the shared database.
pub struct PgHarness {
    pub pool: PgPool,
    pub db: Database,
}

impl AsyncTestContext for PgHarness {
    async fn setup() -> Self {
        Self::new().await.expect("Failed to create test harness")
    }

    async fn teardown(self) {
        self.pool.close().await;
    }
}

impl PgHarness {
    pub async fn new() -> Result<Self> {
        let shared = SharedPostgres::get().await;
        let pool = PgPoolOptions::new()
            .max_connections(8)
            .connect(&shared.db_url)
            .await
            .context("Failed to connect to shared Postgres")?;

        Ok(Self {
            db: Database::from_postgres(pool.clone()),
            pool,
        })
    }

    /// A name no other test uses.
    pub fn unique(prefix: &str) -> String {
        format!("{prefix}-{}", Uuid::new_v4().simple())
    }
}
