//! Shared fixtures for database tests
//!
//! Each `#[sqlx::test]` gets its own database; these helpers create a small blog schema, register
//! `post` (with `comment` as related entity) and install capture on both tables.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use pgtrail_common::Ident;
use pgtrail_server::catalog::PgCatalog;
use pgtrail_server::features::FeatureState;
use pgtrail_server::installer::{Direction, PgExecutor, Reconciler};
use pgtrail_server::{AuditNames, EntityRegistry, TrackedEntity};
use serde_json::Value;
use sqlx::{FromRow, PgPool};

pub fn names() -> AuditNames {
    AuditNames::parse("audits.logged_actions", "audits.changesets").unwrap()
}

pub fn registry() -> EntityRegistry {
    let mut post = TrackedEntity::new("post", "public.posts".parse().unwrap());
    post.excluded_columns = vec![Ident::new("updated_at").unwrap()];
    post.related = vec!["comment".to_string()];

    let comment = TrackedEntity::new("comment", "public.comments".parse().unwrap());

    EntityRegistry::new(vec![post, comment]).unwrap()
}

pub async fn create_tables(pool: &PgPool) {
    sqlx::raw_sql(
        r#"
        CREATE TABLE posts (
            id serial PRIMARY KEY,
            title text NOT NULL,
            body text,
            views integer NOT NULL DEFAULT 0,
            updated_at timestamptz
        );
        CREATE TABLE comments (
            id serial PRIMARY KEY,
            post_id integer NOT NULL REFERENCES posts (id),
            body text NOT NULL
        );
        "#,
    )
    .execute(pool)
    .await
    .unwrap();
}

/// Install capture for one entity in its own transaction; returns the number of statements.
pub async fn install(pool: &PgPool, entity: &str) -> usize {
    let (names, registry) = (names(), registry());
    let catalog = PgCatalog::new(pool.clone());
    let plan = Reconciler::new(&catalog, &names, &registry)
        .plan(entity, Direction::Up)
        .await
        .unwrap();

    let mut executor = PgExecutor::begin(pool).await.unwrap();
    plan.apply(&mut executor).await.unwrap();
    executor.commit().await.unwrap()
}

/// Tables created and capture installed on both.
pub async fn setup(pool: &PgPool) {
    create_tables(pool).await;
    install(pool, "post").await;
    install(pool, "comment").await;
}

pub fn state(pool: &PgPool) -> FeatureState {
    FeatureState::new(pool.clone(), names(), registry())
}

pub async fn insert_post(pool: &PgPool, title: &str) -> i32 {
    sqlx::query_scalar("INSERT INTO posts (title) VALUES ($1) RETURNING id")
        .bind(title)
        .fetch_one(pool)
        .await
        .unwrap()
}

#[derive(Debug, FromRow)]
pub struct CapturedRow {
    pub action_id: i64,
    pub table_name: String,
    pub action_type: String,
    pub row_data: Option<Value>,
    pub changed_fields: Option<Value>,
    pub key_type: String,
    pub changeset_id: Option<i32>,
    pub transaction_id: Option<i64>,
}

/// Row-level audit records in action-id order.
pub async fn captured(pool: &PgPool) -> Vec<CapturedRow> {
    sqlx::query_as(
        r#"
        SELECT action_id, table_name, action_type::text AS action_type, row_data, changed_fields,
               key_type::text AS key_type, changeset_id, transaction_id
        FROM audits.logged_actions
        WHERE NOT statement_only
        ORDER BY action_id
        "#,
    )
    .fetch_all(pool)
    .await
    .unwrap()
}
