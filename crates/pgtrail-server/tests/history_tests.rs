//! Unit-of-work resolution and history façade tests
//!
//! Coverage:
//! - grouping by transaction and changeset, newest unit first
//! - related entities in the history scope
//! - search filters and pagination, with diffs unaffected by page boundaries
//! - repeated queries returning the same units
//! - per-record diffs, attribute timelines, version snapshots and replay
//! - the HTTP endpoint

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use common::{insert_post, names, setup, state};
use pgtrail_server::api::create_router;
use pgtrail_server::capture::{replay, Actor, ChangesetScope};
use pgtrail_server::config::Config;
use pgtrail_server::features::history::{
    attribute_versions, history, load_version, record_version_ids, HistoryQuery,
};
use pgtrail_server::features::shared::PaginationParams;
use pgtrail_server::resolver::{ActionFilter, ActionType, KeyType};
use pgtrail_server::AuditError;
use serde_json::{json, Map, Value};
use sqlx::PgPool;
use tower::ServiceExt;

async fn update_title(pool: &PgPool, id: i32, title: &str) {
    sqlx::query("UPDATE posts SET title = $1 WHERE id = $2")
        .bind(title)
        .bind(id)
        .execute(pool)
        .await
        .unwrap();
}

/// One post and its first comment written in one transaction.
async fn post_with_comment(pool: &PgPool, title: &str) -> i32 {
    let mut tx = pool.begin().await.unwrap();
    let id: i32 = sqlx::query_scalar("INSERT INTO posts (title) VALUES ($1) RETURNING id")
        .bind(title)
        .fetch_one(&mut *tx)
        .await
        .unwrap();
    sqlx::query("INSERT INTO comments (post_id, body) VALUES ($1, 'hello')")
        .bind(id)
        .execute(&mut *tx)
        .await
        .unwrap();
    tx.commit().await.unwrap();
    id
}

#[sqlx::test(migrations = false)]
#[ignore] // Requires database
async fn test_units_grouped_by_transaction(pool: PgPool) {
    setup(&pool).await;
    let id = post_with_comment(&pool, "a").await;
    update_title(&pool, id, "b").await;

    let page = history(&state(&pool), "post", &HistoryQuery::default())
        .await
        .unwrap();

    assert_eq!(page.pagination.total, 2);
    assert_eq!(page.items.len(), 2);

    let newest = &page.items[0];
    assert_eq!(newest.key.key_type, KeyType::Transaction);
    assert_eq!(newest.actions.len(), 1);
    let update = &newest.actions[0];
    assert_eq!(update.action_type, ActionType::Update);
    assert_eq!(update.entity.as_deref(), Some("post"));
    assert_eq!(update.entity_key, Some(json!({"id": id})));
    assert_eq!(update.diff.len(), 1);
    assert_eq!(update.diff[0].attribute, "title");
    assert_eq!(update.diff[0].old, Some(json!("a")));
    assert_eq!(update.diff[0].new, Some(json!("b")));

    let oldest = &page.items[1];
    let tables: Vec<&str> = oldest.actions.iter().map(|a| a.table_name.as_str()).collect();
    assert_eq!(tables, vec!["posts", "comments"]);
    assert!(oldest.changeset.is_none());
    assert_eq!(oldest.request_date, oldest.actions[0].action_date);
}

#[sqlx::test(migrations = false)]
#[ignore] // Requires database
async fn test_history_by_key(pool: PgPool) {
    setup(&pool).await;
    let first = insert_post(&pool, "first").await;
    let second = insert_post(&pool, "second").await;
    update_title(&pool, second, "second, edited").await;

    let query = HistoryQuery {
        key: Some(json!(first)),
        ..Default::default()
    };
    let page = history(&state(&pool), "post", &query).await.unwrap();
    assert_eq!(page.pagination.total, 1);
    assert_eq!(page.items[0].actions[0].entity_key, Some(json!({"id": first})));

    let query = HistoryQuery {
        key: Some(json!({"id": second})),
        ..Default::default()
    };
    let page = history(&state(&pool), "post", &query).await.unwrap();
    assert_eq!(page.pagination.total, 2);
}

#[sqlx::test(migrations = false)]
#[ignore] // Requires database
async fn test_changeset_unit_carries_request_metadata(pool: PgPool) {
    setup(&pool).await;
    insert_post(&pool, "unrelated").await;

    let actor = Actor {
        user_id: Some(7),
        request_url: Some("/posts/new".into()),
        ..Actor::default()
    };
    let mut scope = ChangesetScope::begin(&pool, &names(), &actor).await.unwrap();
    let post_id: i32 = sqlx::query_scalar("INSERT INTO posts (title) VALUES ('a') RETURNING id")
        .fetch_one(&mut *scope.connection())
        .await
        .unwrap();
    sqlx::query("UPDATE posts SET views = 1 WHERE id = $1")
        .bind(post_id)
        .execute(&mut *scope.connection())
        .await
        .unwrap();
    let changeset_id = scope.end().await.unwrap();

    let query = HistoryQuery {
        filter: ActionFilter {
            user_ids: vec![7],
            request_url: Some("POSTS/NEW".into()),
            ..Default::default()
        },
        ..Default::default()
    };
    let page = history(&state(&pool), "post", &query).await.unwrap();

    assert_eq!(page.pagination.total, 1);
    let unit = &page.items[0];
    assert_eq!(unit.key.key_type, KeyType::Changeset);
    assert_eq!(unit.key.id, i64::from(changeset_id));
    assert_eq!(unit.actions.len(), 2, "both transactions of the changeset");
    let changeset = unit.changeset.as_ref().unwrap();
    assert_eq!(changeset.user_id, Some(7));
    assert_eq!(unit.request_date, changeset.request_date);
}

#[sqlx::test(migrations = false)]
#[ignore] // Requires database
async fn test_filters(pool: PgPool) {
    setup(&pool).await;
    let id = insert_post(&pool, "draft post").await;
    sqlx::query("UPDATE posts SET views = 10 WHERE id = $1")
        .bind(id)
        .execute(&pool)
        .await
        .unwrap();
    post_with_comment(&pool, "other").await;
    let state = state(&pool);

    let by_type = HistoryQuery {
        filter: ActionFilter {
            action_types: vec![ActionType::Update],
            ..Default::default()
        },
        ..Default::default()
    };
    assert_eq!(history(&state, "post", &by_type).await.unwrap().pagination.total, 1);

    let by_attribute = HistoryQuery {
        filter: ActionFilter {
            attributes: vec!["views".into()],
            ..Default::default()
        },
        ..Default::default()
    };
    assert_eq!(history(&state, "post", &by_attribute).await.unwrap().pagination.total, 1);

    let by_value = HistoryQuery {
        filter: ActionFilter {
            value: Some("DRAFT".into()),
            ..Default::default()
        },
        ..Default::default()
    };
    assert_eq!(history(&state, "post", &by_value).await.unwrap().pagination.total, 2);

    let by_table = HistoryQuery {
        filter: ActionFilter {
            tables: vec!["comment".into()],
            ..Default::default()
        },
        ..Default::default()
    };
    let page = history(&state, "post", &by_table).await.unwrap();
    assert_eq!(page.pagination.total, 1);
    assert_eq!(page.items[0].actions.len(), 2);

    let in_the_past = HistoryQuery {
        filter: ActionFilter {
            to: Some(chrono::Utc::now() - chrono::Duration::days(1)),
            ..Default::default()
        },
        ..Default::default()
    };
    let page = history(&state, "post", &in_the_past).await.unwrap();
    assert_eq!(page.pagination.total, 0);
    assert!(page.items.is_empty());

    let unknown_table = HistoryQuery {
        filter: ActionFilter {
            tables: vec!["public.nope".into()],
            ..Default::default()
        },
        ..Default::default()
    };
    assert!(matches!(
        history(&state, "post", &unknown_table).await,
        Err(AuditError::Input(_))
    ));
}

#[sqlx::test(migrations = false)]
#[ignore] // Requires database
async fn test_pagination(pool: PgPool) {
    setup(&pool).await;
    let mut ids = Vec::new();
    for i in 0..5 {
        ids.push(insert_post(&pool, &format!("post {i}")).await);
    }
    let state = state(&pool);

    let query = HistoryQuery {
        pagination: PaginationParams::new(Some(2), Some(2)),
        ..Default::default()
    };
    let page = history(&state, "post", &query).await.unwrap();
    assert_eq!(page.pagination.total, 5);
    assert_eq!(page.pagination.pages, 3);
    let keys: Vec<_> = page
        .items
        .iter()
        .map(|u| u.actions[0].entity_key.clone().unwrap())
        .collect();
    assert_eq!(keys, vec![json!({"id": ids[2]}), json!({"id": ids[1]})]);

    let invalid = HistoryQuery {
        pagination: PaginationParams::new(Some(0), None),
        ..Default::default()
    };
    assert!(history(&state, "post", &invalid).await.is_err());
}

#[sqlx::test(migrations = false)]
#[ignore] // Requires database
async fn test_diff_baseline_crosses_page_boundary(pool: PgPool) {
    setup(&pool).await;
    let id = insert_post(&pool, "a").await;
    sqlx::query("UPDATE posts SET views = 9 WHERE id = $1")
        .bind(id)
        .execute(&pool)
        .await
        .unwrap();
    update_title(&pool, id, "b").await;
    let state = state(&pool);

    let page_of = |page| HistoryQuery {
        pagination: PaginationParams::new(Some(page), Some(1)),
        ..Default::default()
    };

    let newest = history(&state, "post", &page_of(1)).await.unwrap();
    assert_eq!(newest.pagination.total, 3);
    let diff = &newest.items[0].actions[0].diff;
    assert_eq!(diff.len(), 1, "{:?}", diff);
    assert_eq!(diff[0].attribute, "title");
    assert_eq!(diff[0].old, Some(json!("a")));

    let middle = history(&state, "post", &page_of(2)).await.unwrap();
    assert_eq!(middle.items.len(), 1);
    let update = &middle.items[0].actions[0];
    assert_eq!(update.action_type, ActionType::Update);
    assert_eq!(update.diff.len(), 1, "{:?}", update.diff);
    assert_eq!(update.diff[0].attribute, "views");
    assert_eq!(update.diff[0].old, Some(json!(0)));
    assert_eq!(update.diff[0].new, Some(json!(9)));
}

#[sqlx::test(migrations = false)]
#[ignore] // Requires database
async fn test_repeated_history_is_identical(pool: PgPool) {
    setup(&pool).await;
    let id = post_with_comment(&pool, "a").await;
    update_title(&pool, id, "unscoped").await;

    let actor = Actor {
        user_id: Some(3),
        ..Actor::default()
    };
    let mut scope = ChangesetScope::begin(&pool, &names(), &actor).await.unwrap();
    sqlx::query("UPDATE posts SET views = 2 WHERE id = $1")
        .bind(id)
        .execute(&mut *scope.connection())
        .await
        .unwrap();
    sqlx::query("INSERT INTO comments (post_id, body) VALUES ($1, 'again')")
        .bind(id)
        .execute(&mut *scope.connection())
        .await
        .unwrap();
    scope.end().await.unwrap();

    let state = state(&pool);
    let query = HistoryQuery {
        pagination: PaginationParams::new(Some(1), Some(2)),
        ..Default::default()
    };
    let first = history(&state, "post", &query).await.unwrap();
    let second = history(&state, "post", &query).await.unwrap();

    assert_eq!(first.pagination.total, 3);
    assert_eq!(
        serde_json::to_value(&first).unwrap(),
        serde_json::to_value(&second).unwrap()
    );
    assert_eq!(first.items[0].key.key_type, KeyType::Changeset);
    assert_eq!(first.items[0].actions.len(), 2);
    assert_eq!(first.items[1].key.key_type, KeyType::Transaction);
}

#[sqlx::test(migrations = false)]
#[ignore] // Requires database
async fn test_versions_and_attribute_timeline(pool: PgPool) {
    setup(&pool).await;
    let id = insert_post(&pool, "a").await;
    sqlx::query("UPDATE posts SET views = 5 WHERE id = $1")
        .bind(id)
        .execute(&pool)
        .await
        .unwrap();
    update_title(&pool, id, "b").await;
    let state = state(&pool);

    let ids = record_version_ids(&state, "post", &json!(id)).await.unwrap();
    assert_eq!(ids.len(), 3);
    assert!(ids.windows(2).all(|w| w[0] < w[1]));

    let timeline = attribute_versions(&state, "post", &json!(id), "title").await.unwrap();
    let values: Vec<_> = timeline.iter().map(|v| v.value.clone()).collect();
    assert_eq!(values, vec![Some(json!("a")), Some(json!("b"))]);
    assert_eq!(timeline[1].action_id, ids[2]);

    let version = load_version(&state, "post", ids[1]).await.unwrap().unwrap();
    let data = version.data.unwrap();
    assert_eq!(data["title"], json!("a"));
    assert_eq!(data["views"], json!(5));
    assert!(!version.deleted);

    assert!(load_version(&state, "comment", ids[1]).await.unwrap().is_none());
    assert!(load_version(&state, "post", 999_999).await.unwrap().is_none());

    assert!(matches!(
        attribute_versions(&state, "post", &json!(id), "updated_at").await,
        Err(AuditError::Input(_))
    ));
    assert!(matches!(
        attribute_versions(&state, "post", &json!(id), "nope").await,
        Err(AuditError::Input(_))
    ));
    assert!(matches!(
        record_version_ids(&state, "tag", &json!(1)).await,
        Err(AuditError::Config(_))
    ));
}

#[sqlx::test(migrations = false)]
#[ignore] // Requires database
async fn test_replay_reconstructs_current_row(pool: PgPool) {
    setup(&pool).await;
    let id = insert_post(&pool, "a").await;
    update_title(&pool, id, "b").await;
    sqlx::query("UPDATE posts SET views = views + 4, body = 'text', updated_at = now() WHERE id = $1")
        .bind(id)
        .execute(&pool)
        .await
        .unwrap();

    let records: Vec<(String, Option<Value>, Option<Value>)> = sqlx::query_as(
        r#"
        SELECT action_type::text, row_data, changed_fields
        FROM audits.logged_actions
        WHERE NOT statement_only AND table_name = 'posts'
        ORDER BY action_id
        "#,
    )
    .fetch_all(&pool)
    .await
    .unwrap();

    let objects: Vec<(ActionType, Option<Map<String, Value>>, Option<Map<String, Value>>)> = records
        .into_iter()
        .map(|(t, r, c)| {
            (
                t.parse().unwrap(),
                r.and_then(|v| v.as_object().cloned()),
                c.and_then(|v| v.as_object().cloned()),
            )
        })
        .collect();
    let state = replay(objects.iter().map(|(t, r, c)| (*t, r.as_ref(), c.as_ref()))).unwrap();

    let current: Value = sqlx::query_scalar("SELECT to_jsonb(p) - 'updated_at' FROM posts p WHERE id = $1")
        .bind(id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(Value::Object(state), current);
}

#[sqlx::test(migrations = false)]
#[ignore] // Requires database
async fn test_history_endpoint(pool: PgPool) {
    setup(&pool).await;
    let id = insert_post(&pool, "a").await;
    update_title(&pool, id, "b").await;

    let app = create_router(state(&pool), &Config::default());

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/api/v1/history/post?key={id}&action_types=UPDATE"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["success"], json!(true));
    assert_eq!(body["meta"]["pagination"]["total"], json!(1));
    assert_eq!(body["data"][0]["actions"][0]["action_type"], json!("UPDATE"));

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/v1/history/post/versions/424242")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
