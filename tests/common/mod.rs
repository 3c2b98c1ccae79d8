#![allow(dead_code)]

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use uuid::Uuid;

use moderator::classifier::{Category, ClassificationError, Classifier, Scores};
use moderator::db;
use moderator::download::LocalResource;
use moderator::models::QueueItem;

/// A dedicated, migrated test database.
pub struct TestDb {
    pub pool: PgPool,
    pub db_name: String,
}

fn admin_url(base_url: &str) -> String {
    base_url
        .rsplit_once('/')
        .map(|(base, _)| format!("{base}/postgres"))
        .unwrap_or_else(|| base_url.to_string())
}

/// Create a fresh temporary database and run migrations on it.
pub async fn spawn_db() -> TestDb {
    spawn_db_with(5).await
}

pub async fn spawn_db_with(max_connections: u32) -> TestDb {
    let _ = dotenvy::dotenv();

    let base_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for tests");

    let db_name = format!("moderator_test_{}", Uuid::now_v7().simple());

    let admin_pool = PgPoolOptions::new()
        .max_connections(2)
        .connect(&admin_url(&base_url))
        .await
        .expect("Failed to connect to postgres for test DB creation");

    sqlx::query(&format!("CREATE DATABASE \"{db_name}\""))
        .execute(&admin_pool)
        .await
        .expect("Failed to create test database");

    admin_pool.close().await;

    let test_url = base_url
        .rsplit_once('/')
        .map(|(base, _)| format!("{base}/{db_name}"))
        .unwrap_or_else(|| base_url.clone());

    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(&test_url)
        .await
        .expect("Failed to connect to test database");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to run migrations on test database");

    TestDb { pool, db_name }
}

/// Drop the test database after the test completes.
pub async fn cleanup(db: TestDb) {
    let db_name = db.db_name.clone();
    db.pool.close().await;

    let base_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for tests");

    let admin_pool = PgPoolOptions::new()
        .max_connections(2)
        .connect(&admin_url(&base_url))
        .await
        .expect("Failed to connect for cleanup");

    let _ = sqlx::query(&format!("DROP DATABASE IF EXISTS \"{db_name}\" WITH (FORCE)"))
        .execute(&admin_pool)
        .await;

    admin_pool.close().await;
}

pub async fn enqueue(pool: &PgPool, url: &str) -> i64 {
    db::images::enqueue(pool, url)
        .await
        .expect("enqueue failed")
        .id
}

pub async fn fetch(pool: &PgPool, id: i64) -> QueueItem {
    db::images::find_by_id(pool, id)
        .await
        .expect("lookup failed")
        .expect("image row missing")
}

/// Pretend the current claim on `id` was taken `secs` seconds ago.
pub async fn age_claim(pool: &PgPool, id: i64, secs: i64) {
    sqlx::query(
        "UPDATE images SET claimed_at = now() - make_interval(secs => $2::double precision)
         WHERE id = $1",
    )
    .bind(id)
    .bind(secs as f64)
    .execute(pool)
    .await
    .expect("failed to age claim");
}

pub fn scores(porn: f64, sexy: f64, hentai: f64) -> Scores {
    Scores::new()
        .with(Category::Porn, porn)
        .with(Category::Sexy, sexy)
        .with(Category::Hentai, hentai)
}

/// What the stub classifier does when called.
#[derive(Debug, Clone)]
pub enum StubBehavior {
    Return(Scores),
    Fail(String),
    Panic,
    Hang,
}

/// Classifier double that records whether the resource was on disk when called.
pub struct StubClassifier {
    behavior: StubBehavior,
    seen: Arc<Mutex<Vec<(std::path::PathBuf, bool)>>>,
}

impl StubClassifier {
    pub fn new(behavior: StubBehavior) -> Self {
        Self {
            behavior,
            seen: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Paths handed to `classify`, with whether each existed at that moment.
    pub fn seen(&self) -> Vec<(std::path::PathBuf, bool)> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl Classifier for StubClassifier {
    async fn classify(&self, resource: &LocalResource) -> Result<Scores, ClassificationError> {
        let path = resource.path().to_path_buf();
        let exists = path.exists();
        self.seen.lock().unwrap().push((path, exists));

        match &self.behavior {
            StubBehavior::Return(scores) => Ok(scores.clone()),
            StubBehavior::Fail(msg) => Err(ClassificationError::Unavailable(msg.clone())),
            StubBehavior::Panic => panic!("model exploded"),
            StubBehavior::Hang => std::future::pending().await,
        }
    }
}

pub fn dir_is_empty(dir: &Path) -> bool {
    std::fs::read_dir(dir)
        .expect("scratch dir unreadable")
        .next()
        .is_none()
}
