//! Integration tests for the generic CRUD template.
//!
//! Each test gets its own SQLite file seeded with three users
//! (ids 100, 200 and 300).

use chrono::{NaiveDate, NaiveDateTime};
use db_router::config::DatabaseProperties;
use db_router::db::{DatabaseRegistry, ExecutionContext, Statement, StatementPipeline};
use db_router::error::{DbError, DbResult};
use db_router::models::{DataSourceDescriptor, Record, Role, Value};
use db_router::template::{Entity, EntityDescriptor, TemplateDao};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

#[derive(Debug, Clone, Default, PartialEq)]
struct User {
    id: Option<i64>,
    name: Option<String>,
    birthday: Option<NaiveDate>,
    created_at: Option<NaiveDateTime>,
    updated_at: Option<NaiveDateTime>,
}

impl User {
    fn named(name: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            ..Self::default()
        }
    }
}

impl Entity for User {
    fn to_record(&self) -> Record {
        Record::new()
            .with("id", self.id)
            .with("name", self.name.clone())
            .with("birthday", self.birthday)
            .with("createdAt", self.created_at)
            .with("updatedAt", self.updated_at)
    }

    fn from_record(mut record: Record) -> DbResult<Self> {
        Ok(Self {
            id: record.take("id")?,
            name: record.take("name")?,
            birthday: record.take("birthday")?,
            created_at: record.take("createdAt")?,
            updated_at: record.take("updatedAt")?,
        })
    }
}

fn user_descriptor() -> EntityDescriptor {
    EntityDescriptor::builder("simple_user")
        .field("name")
        .field("birthday")
        .column("createdAt", "created_at")
        .column("updatedAt", "updated_at")
        .created_at("createdAt")
        .updated_at("updatedAt")
        .build()
        .unwrap()
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// Test fixture keeping the temp directory alive.
struct Fixture {
    _dir: TempDir,
    pipeline: Arc<StatementPipeline>,
    dao: TemplateDao<User>,
    ctx: ExecutionContext,
}

async fn setup() -> Fixture {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("users.db");
    let db = DatabaseProperties::new("user")
        .with_pool(1, 4, 2000)
        .with_datasource(DataSourceDescriptor::new(
            "user-master",
            Role::Master,
            format!("sqlite:{}", path.display()),
        ));
    let registry = Arc::new(DatabaseRegistry::connect(vec![db]).await.unwrap());
    let pipeline = Arc::new(StatementPipeline::new(registry));
    let ctx = ExecutionContext::new();

    for sql in [
        "CREATE TABLE simple_user (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT,
            birthday DATE,
            created_at DATETIME,
            updated_at DATETIME
        )",
        "INSERT INTO simple_user (id, name, birthday, created_at, updated_at) VALUES
            (100, 'User 1', '1990-01-01', '2020-01-01 00:00:00', '2020-01-01 00:00:00'),
            (200, 'User 2', '1991-02-02', '2020-01-01 00:00:00', '2020-01-01 00:00:00'),
            (300, 'User 3', '1992-03-03', '2020-01-01 00:00:00', '2020-01-01 00:00:00')",
    ] {
        pipeline.execute(&ctx, Statement::update(sql)).await.unwrap();
    }

    Fixture {
        _dir: dir,
        dao: TemplateDao::new(pipeline.clone(), Arc::new(user_descriptor())),
        pipeline,
        ctx,
    }
}

fn seeded_at() -> NaiveDateTime {
    date(2020, 1, 1).and_hms_opt(0, 0, 0).unwrap()
}

#[tokio::test]
async fn test_create_assigns_key_and_audit_fields() {
    let f = setup().await;
    let mut user = User {
        birthday: Some(date(1998, 4, 4)),
        ..User::named("User 4")
    };

    assert!(f.dao.create(&f.ctx, &mut user).await.unwrap());
    let id = user.id.expect("generated key written back");
    assert!(user.created_at.is_some());

    let found = f.dao.find(&f.ctx, id).await.unwrap().unwrap();
    assert_eq!(found.name.as_deref(), Some("User 4"));
    assert_eq!(found.birthday, Some(date(1998, 4, 4)));
    assert!(found.created_at.is_some());
    assert!(found.updated_at.is_some());
}

#[tokio::test]
async fn test_create_overwrites_caller_audit_values() {
    let f = setup().await;
    let mut user = User {
        created_at: Some(seeded_at()),
        ..User::named("late")
    };
    f.dao.create(&f.ctx, &mut user).await.unwrap();

    let found = f.dao.find(&f.ctx, user.id.unwrap()).await.unwrap().unwrap();
    assert!(found.created_at.unwrap() > seeded_at());
}

#[tokio::test]
async fn test_create_continues_key_sequence() {
    let f = setup().await;
    let mut user = User::default();
    assert!(f.dao.create(&f.ctx, &mut user).await.unwrap());
    assert_eq!(user.id, Some(301));
}

#[tokio::test]
async fn test_find_missing_returns_none() {
    let f = setup().await;
    assert!(f.dao.find(&f.ctx, 9999).await.unwrap().is_none());
}

#[tokio::test]
async fn test_patch_updates_only_present_fields() {
    let f = setup().await;
    let mut patch = User {
        id: Some(100),
        ..User::named("部分更新名称")
    };

    assert!(f.dao.patch(&f.ctx, &mut patch).await.unwrap());

    let found = f.dao.find(&f.ctx, 100).await.unwrap().unwrap();
    assert_eq!(found.name.as_deref(), Some("部分更新名称"));
    assert_eq!(found.birthday, Some(date(1990, 1, 1)));
    assert_eq!(found.created_at, Some(seeded_at()));
    assert!(found.updated_at.unwrap() > seeded_at());
}

#[tokio::test]
async fn test_patch_with_only_key_refreshes_updated() {
    let f = setup().await;
    let mut patch = User {
        id: Some(200),
        ..User::default()
    };
    assert!(f.dao.patch(&f.ctx, &mut patch).await.unwrap());

    let found = f.dao.find(&f.ctx, 200).await.unwrap().unwrap();
    assert_eq!(found.name.as_deref(), Some("User 2"));
    assert!(found.updated_at.unwrap() > seeded_at());
}

#[tokio::test]
async fn test_patch_missing_row_returns_false() {
    let f = setup().await;
    let mut patch = User {
        id: Some(9999),
        ..User::named("nobody")
    };
    assert!(!f.dao.patch(&f.ctx, &mut patch).await.unwrap());
}

#[tokio::test]
async fn test_update_twice_advances_updated_only() {
    let f = setup().await;
    let mut user = f.dao.find(&f.ctx, 300).await.unwrap().unwrap();
    user.name = Some("same".to_string());

    assert!(f.dao.update(&f.ctx, &mut user).await.unwrap());
    let first = f.dao.find(&f.ctx, 300).await.unwrap().unwrap();

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(f.dao.update(&f.ctx, &mut user).await.unwrap());
    let second = f.dao.find(&f.ctx, 300).await.unwrap().unwrap();

    assert_eq!(first.name, second.name);
    assert_eq!(first.birthday, second.birthday);
    assert_eq!(first.created_at, Some(seeded_at()));
    assert_eq!(second.created_at, Some(seeded_at()));
    assert!(second.updated_at > first.updated_at);
}

#[tokio::test]
async fn test_update_cannot_change_created() {
    let f = setup().await;
    let mut user = f.dao.find(&f.ctx, 100).await.unwrap().unwrap();
    user.created_at = Some(date(2030, 1, 1).and_hms_opt(0, 0, 0).unwrap());
    f.dao.update(&f.ctx, &mut user).await.unwrap();

    let found = f.dao.find(&f.ctx, 100).await.unwrap().unwrap();
    assert_eq!(found.created_at, Some(seeded_at()));
}

#[tokio::test]
async fn test_update_writes_nulls() {
    let f = setup().await;
    let mut user = User {
        id: Some(100),
        ..User::named("no birthday")
    };
    assert!(f.dao.update(&f.ctx, &mut user).await.unwrap());

    let found = f.dao.find(&f.ctx, 100).await.unwrap().unwrap();
    assert_eq!(found.birthday, None);
}

#[tokio::test]
async fn test_update_without_key_is_mapping_error() {
    let f = setup().await;
    let mut user = User::named("keyless");
    let err = f.dao.update(&f.ctx, &mut user).await.unwrap_err();
    assert!(matches!(err, DbError::Mapping { .. }));
}

#[tokio::test]
async fn test_find_by_ids() {
    let f = setup().await;
    let mut users = f.dao.find_by_ids(&f.ctx, [100, 300, 9999]).await.unwrap();
    users.sort_by_key(|u| u.id);
    let ids: Vec<_> = users.iter().map(|u| u.id.unwrap()).collect();
    assert_eq!(ids, vec![100, 300]);
}

#[tokio::test]
async fn test_find_by_ids_empty_skips_database() {
    let f = setup().await;
    // Routing to an unknown database would fail if a statement were issued.
    let ctx = ExecutionContext::new().with_database("no-such-db");
    let users = f.dao.find_by_ids(&ctx, Vec::<i64>::new()).await.unwrap();
    assert!(users.is_empty());
    assert_eq!(f.dao.batch_delete(&ctx, Vec::<i64>::new()).await.unwrap(), 0);
    assert!(f.dao.batch_create(&ctx, &mut Vec::new()).await.unwrap());
    assert!(f.dao.batch_patch(&ctx, &mut Vec::new()).await.unwrap());
}

#[tokio::test]
async fn test_find_by_field() {
    let f = setup().await;
    let users = f
        .dao
        .find_by_field(&f.ctx, "name", ["User 2", "nobody"])
        .await
        .unwrap();
    assert_eq!(users.len(), 1);
    assert_eq!(users[0].id, Some(200));

    let err = f
        .dao
        .find_by_field(&f.ctx, "nickname", ["x"])
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::Mapping { .. }));
}

#[tokio::test]
async fn test_batch_delete_counts_removed_rows() {
    let f = setup().await;
    assert_eq!(f.dao.batch_delete(&f.ctx, [200, 9999]).await.unwrap(), 1);
    assert!(f.dao.find(&f.ctx, 200).await.unwrap().is_none());
}

#[tokio::test]
async fn test_remove() {
    let f = setup().await;
    assert!(f.dao.remove(&f.ctx, 300).await.unwrap());
    assert!(!f.dao.remove(&f.ctx, 300).await.unwrap());
}

#[tokio::test]
async fn test_batch_create_stamps_every_row() {
    let f = setup().await;
    let mut users = vec![User::named("B1"), User::named("B2")];

    assert!(f.dao.batch_create(&f.ctx, &mut users).await.unwrap());
    assert!(users.iter().all(|u| u.created_at.is_some() && u.id.is_none()));

    let found = f
        .dao
        .find_by_field(&f.ctx, "name", ["B1", "B2"])
        .await
        .unwrap();
    assert_eq!(found.len(), 2);
    assert!(found.iter().all(|u| u.id.is_some() && u.updated_at.is_some()));
}

#[tokio::test]
async fn test_batch_patch() {
    let f = setup().await;
    let mut patches = vec![
        User {
            id: Some(100),
            ..User::named("first")
        },
        User {
            id: Some(300),
            birthday: Some(date(2000, 12, 31)),
            ..User::default()
        },
    ];

    assert!(f.dao.batch_patch(&f.ctx, &mut patches).await.unwrap());

    let first = f.dao.find(&f.ctx, 100).await.unwrap().unwrap();
    assert_eq!(first.name.as_deref(), Some("first"));
    assert_eq!(first.birthday, Some(date(1990, 1, 1)));

    let third = f.dao.find(&f.ctx, 300).await.unwrap().unwrap();
    assert_eq!(third.name.as_deref(), Some("User 3"));
    assert_eq!(third.birthday, Some(date(2000, 12, 31)));
    assert!(third.updated_at.unwrap() > seeded_at());

    let untouched = f.dao.find(&f.ctx, 200).await.unwrap().unwrap();
    assert_eq!(untouched.updated_at, Some(seeded_at()));
}

#[tokio::test]
async fn test_batch_patch_reports_unmatched_rows() {
    let f = setup().await;
    let mut patches = vec![
        User {
            id: Some(100),
            ..User::named("x")
        },
        User {
            id: Some(9999),
            ..User::named("y")
        },
    ];
    assert!(!f.dao.batch_patch(&f.ctx, &mut patches).await.unwrap());
}

#[tokio::test]
async fn test_batch_patch_missing_key_runs_nothing() {
    let f = setup().await;
    let mut patches = vec![
        User {
            id: Some(100),
            ..User::named("changed")
        },
        User::named("keyless"),
    ];
    let err = f.dao.batch_patch(&f.ctx, &mut patches).await.unwrap_err();
    assert!(matches!(err, DbError::Mapping { .. }));

    let found = f.dao.find(&f.ctx, 100).await.unwrap().unwrap();
    assert_eq!(found.name.as_deref(), Some("User 1"));
}

#[tokio::test]
async fn test_custom_query_with_collection() {
    let f = setup().await;
    let mut users = f
        .dao
        .query(
            &f.ctx,
            "SELECT * FROM simple_user WHERE id IN (@ids) AND name <> ? ORDER BY id",
        )
        .bind_list("ids", [100, 200, 300])
        .bind("User 2")
        .fetch_all()
        .await
        .unwrap();
    users.sort_by_key(|u| u.id);
    assert_eq!(users.len(), 2);
    assert_eq!(users[1].id, Some(300));
}

#[tokio::test]
async fn test_custom_query_empty_collection_is_invalid() {
    let f = setup().await;
    let err = f
        .dao
        .query(&f.ctx, "SELECT * FROM simple_user WHERE id IN (@ids)")
        .bind_list("ids", Vec::<i64>::new())
        .fetch_all()
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::InvalidInput { .. }));
}

#[tokio::test]
async fn test_custom_query_records_and_execute() {
    let f = setup().await;
    let records = f
        .dao
        .query(&f.ctx, "SELECT COUNT(*) AS total FROM simple_user")
        .fetch_records()
        .await
        .unwrap();
    assert_eq!(records[0].get("total"), Some(&Value::Int(3)));

    let changed = f
        .dao
        .query(&f.ctx, "UPDATE simple_user SET name = ? WHERE id = ?")
        .bind("renamed")
        .bind(200)
        .execute()
        .await
        .unwrap();
    assert_eq!(changed, 1);

    let user = f
        .dao
        .query(&f.ctx, "SELECT * FROM simple_user WHERE name = ?")
        .bind("renamed")
        .fetch_optional()
        .await
        .unwrap();
    assert_eq!(user.and_then(|u| u.id), Some(200));
}

#[derive(Debug, Clone, Default)]
struct Coupon {
    code: Option<String>,
    label: Option<String>,
}

impl Entity for Coupon {
    fn to_record(&self) -> Record {
        Record::new()
            .with("code", self.code.clone())
            .with("label", self.label.clone())
    }

    fn from_record(mut record: Record) -> DbResult<Self> {
        Ok(Self {
            code: record.take("code")?,
            label: record.take("label")?,
        })
    }
}

#[tokio::test]
async fn test_create_writes_back_server_generated_text_key() {
    let f = setup().await;
    f.pipeline
        .execute(
            &f.ctx,
            Statement::update(
                "CREATE TABLE coupon (
                    code TEXT PRIMARY KEY DEFAULT ('k' || abs(random())),
                    label TEXT
                )",
            ),
        )
        .await
        .unwrap();
    let descriptor = EntityDescriptor::builder("coupon")
        .primary_key("code")
        .field("label")
        .build()
        .unwrap();
    let dao: TemplateDao<Coupon> = TemplateDao::new(f.pipeline.clone(), Arc::new(descriptor));

    let mut coupon = Coupon {
        label: Some("spring".to_string()),
        ..Coupon::default()
    };
    assert!(dao.create(&f.ctx, &mut coupon).await.unwrap());
    let code = coupon.code.clone().expect("generated key written back");
    assert!(code.starts_with('k'));

    let found = dao.find(&f.ctx, code.as_str()).await.unwrap().unwrap();
    assert_eq!(found.code.as_deref(), Some(code.as_str()));
    assert_eq!(found.label.as_deref(), Some("spring"));
}

#[tokio::test]
async fn test_mapping_failure_names_the_table() {
    let f = setup().await;
    let err = f
        .dao
        .query(&f.ctx, "SELECT id, 42 AS name FROM simple_user WHERE id = 100")
        .fetch_all()
        .await
        .unwrap_err();
    match err {
        DbError::Mapping { entity, message } => {
            assert_eq!(entity, "simple_user");
            assert!(message.contains("name"));
        }
        other => panic!("expected a mapping error, got {:?}", other),
    }
}
