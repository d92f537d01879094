//! Integration tests for master/replica routing.
//!
//! The master and replica are separate SQLite files, each holding a marker
//! row naming the file, so every result shows which datasource served it.

use db_router::config::DatabaseProperties;
use db_router::db::{
    DatabaseRegistry, ExecutionContext, RouteReason, Statement, StatementPipeline,
};
use db_router::error::DbError;
use db_router::models::{DataSourceDescriptor, Role, Value};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

fn sqlite_url(path: &Path) -> String {
    format!("sqlite:{}", path.display())
}

/// Create a database file with a one-row `origin` table.
async fn seed(path: &Path, marker: &str) {
    let db = DatabaseProperties::new("seed")
        .with_pool(1, 1, 1000)
        .with_datasource(DataSourceDescriptor::new("seed", Role::Master, sqlite_url(path)));
    let registry = Arc::new(DatabaseRegistry::connect(vec![db]).await.unwrap());
    let pipeline = StatementPipeline::new(registry.clone());
    let ctx = ExecutionContext::new();

    pipeline
        .execute(&ctx, Statement::update("CREATE TABLE origin (name TEXT)"))
        .await
        .unwrap();
    pipeline
        .execute(&ctx, Statement::update("INSERT INTO origin (name) VALUES (?)").bind(marker))
        .await
        .unwrap();
    registry.close_all().await;
}

struct Cluster {
    _dir: TempDir,
    pipeline: StatementPipeline,
}

async fn cluster(replicas: usize, master_only: bool) -> Cluster {
    let dir = TempDir::new().unwrap();
    let master = dir.path().join("master.db");
    seed(&master, "master").await;

    let mut db = DatabaseProperties::new("user")
        .with_pool(1, 2, 1000)
        .with_master_only(master_only)
        .with_datasource(DataSourceDescriptor::new("user-master", Role::Master, sqlite_url(&master)));
    for i in 1..=replicas {
        let path = dir.path().join(format!("replica{}.db", i));
        let name = format!("user-replica-{}", i);
        seed(&path, &name).await;
        db = db.with_datasource(DataSourceDescriptor::new(name, Role::Replica, sqlite_url(&path)));
    }

    let registry = Arc::new(DatabaseRegistry::connect(vec![db]).await.unwrap());
    Cluster {
        _dir: dir,
        pipeline: StatementPipeline::new(registry),
    }
}

async fn origin(pipeline: &StatementPipeline, ctx: &ExecutionContext) -> (String, Role) {
    let result = pipeline
        .execute(ctx, Statement::query("SELECT name FROM origin"))
        .await
        .unwrap();
    let name = match result.rows[0].get("name") {
        Some(Value::Text(name)) => name.clone(),
        other => panic!("unexpected origin row: {:?}", other),
    };
    assert_eq!(result.route.datasource, name);
    (name, result.route.role)
}

#[tokio::test]
async fn test_plain_read_uses_replica() {
    let c = cluster(1, false).await;
    let (name, role) = origin(&c.pipeline, &ExecutionContext::new()).await;
    assert_eq!(name, "user-replica-1");
    assert_eq!(role, Role::Replica);
}

#[tokio::test]
async fn test_hint_forces_master() {
    let c = cluster(1, false).await;
    let ctx = ExecutionContext::new().force_master();
    let (name, role) = origin(&c.pipeline, &ctx).await;
    assert_eq!(name, "master");
    assert_eq!(role, Role::Master);
}

#[tokio::test]
async fn test_transaction_reads_from_master() {
    let c = cluster(1, false).await;
    let ctx = ExecutionContext::new().with_transaction(Arc::new(true));
    let (name, _) = origin(&c.pipeline, &ctx).await;
    assert_eq!(name, "master");
}

#[tokio::test]
async fn test_write_goes_to_master() {
    let c = cluster(1, false).await;
    let ctx = ExecutionContext::new();

    let result = c
        .pipeline
        .execute(&ctx, Statement::update("UPDATE origin SET name = name"))
        .await
        .unwrap();
    assert_eq!(result.route.datasource, "user-master");
    assert_eq!(result.rows_affected, 1);
}

#[tokio::test]
async fn test_replica_is_read_only() {
    let c = cluster(1, false).await;
    // A misclassified write ("WITH ... UPDATE" does not start with update)
    // lands on the read-only replica and fails there.
    let err = c
        .pipeline
        .execute(
            &ExecutionContext::new(),
            Statement::update("WITH x AS (SELECT 1) UPDATE origin SET name = 'x'"),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::Database { .. }));
}

#[tokio::test]
async fn test_locking_read_routes_to_master() {
    let c = cluster(1, false).await;
    let plan = c
        .pipeline
        .route(&ExecutionContext::new(), "select * from origin for update", None)
        .unwrap();
    assert_eq!(plan.role, Role::Master);
    assert_eq!(plan.reason, RouteReason::Write);
}

#[tokio::test]
async fn test_replicas_rotate_round_robin() {
    let c = cluster(2, false).await;
    let ctx = ExecutionContext::new();

    let picks: Vec<String> = (0..4)
        .map(|_| c.pipeline.route(&ctx, "SELECT 1", None).unwrap().datasource)
        .collect();
    assert_eq!(
        picks,
        vec![
            "user-replica-1",
            "user-replica-2",
            "user-replica-1",
            "user-replica-2"
        ]
    );
}

#[tokio::test]
async fn test_master_only_database_reads_from_master() {
    let c = cluster(0, true).await;
    let plan = c
        .pipeline
        .route(&ExecutionContext::new(), "SELECT 1", None)
        .unwrap();
    assert_eq!(plan.datasource, "user-master");
    assert_eq!(plan.reason, RouteReason::MasterOnly);

    let (name, role) = origin(&c.pipeline, &ExecutionContext::new()).await;
    assert_eq!(name, "master");
    assert_eq!(role, Role::Master);
}

#[tokio::test]
async fn test_context_is_handed_to_spawned_task() {
    let c = cluster(1, false).await;
    let pipeline = Arc::new(c.pipeline);
    let ctx = ExecutionContext::new().force_master();

    let task = {
        let pipeline = pipeline.clone();
        let ctx = ctx.clone();
        tokio::spawn(async move { origin(&pipeline, &ctx).await })
    };
    let (name, _) = task.await.unwrap();
    assert_eq!(name, "master");

    // A fresh context carries no hint.
    let (name, _) = origin(&pipeline, &ExecutionContext::new()).await;
    assert_eq!(name, "user-replica-1");
}

#[tokio::test]
async fn test_database_selected_by_schema() {
    let dir = TempDir::new().unwrap();
    let orders = dir.path().join("orders.db");
    let users = dir.path().join("users.db");
    seed(&orders, "orders-master").await;
    seed(&users, "users-master").await;

    let databases = vec![
        DatabaseProperties::new("orders")
            .with_schema("shop_orders")
            .with_pool(1, 1, 1000)
            .with_datasource(DataSourceDescriptor::new(
                "orders-master",
                Role::Master,
                sqlite_url(&orders),
            )),
        DatabaseProperties::new("users")
            .as_default()
            .with_pool(1, 1, 1000)
            .with_datasource(DataSourceDescriptor::new(
                "users-master",
                Role::Master,
                sqlite_url(&users),
            )),
    ];
    let registry = Arc::new(DatabaseRegistry::connect(databases).await.unwrap());
    let pipeline = StatementPipeline::new(registry);

    let (name, _) = origin(&pipeline, &ExecutionContext::new()).await;
    assert_eq!(name, "users-master");

    let ctx = ExecutionContext::new().with_database("shop_orders");
    let (name, _) = origin(&pipeline, &ctx).await;
    assert_eq!(name, "orders-master");

    // The context override beats the statement's declared database.
    let result = pipeline
        .execute(
            &ctx,
            Statement::query("SELECT name FROM origin").on_database(Some("users")),
        )
        .await
        .unwrap();
    assert_eq!(result.route.database, "orders");
}
