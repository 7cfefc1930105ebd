use super::queries::{self, HistoryQuery};
use crate::api::response::ApiResponse;
use crate::error::{AuditError, AuditResult};
use crate::features::shared::pagination::PaginationParams;
use crate::features::FeatureState;
use crate::resolver::{ActionFilter, ActionType};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};

pub fn history_routes() -> Router<FeatureState> {
    Router::new()
        .route("/:entity", get(get_history))
        .route("/:entity/versions", get(list_versions))
        .route("/:entity/versions/:action_id", get(get_version))
        .route("/:entity/attributes/:attribute", get(get_attribute_versions))
}

/// Query string of the history endpoint; list filters are comma separated
#[derive(Debug, Default, Deserialize)]
pub struct HistoryParams {
    pub key: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub request_url: Option<String>,
    pub user_ids: Option<String>,
    pub request_addrs: Option<String>,
    pub tables: Option<String>,
    pub action_types: Option<String>,
    pub attributes: Option<String>,
    pub value: Option<String>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

impl HistoryParams {
    pub fn into_query(self) -> AuditResult<HistoryQuery> {
        let filter = ActionFilter {
            from: self.from,
            to: self.to,
            request_url: self.request_url,
            user_ids: split_list(self.user_ids.as_deref())
                .map(|id| {
                    id.parse::<i32>()
                        .map_err(|_| AuditError::input(format!("Invalid user id '{}'", id)))
                })
                .collect::<AuditResult<_>>()?,
            request_addrs: split_list(self.request_addrs.as_deref())
                .map(str::to_string)
                .collect(),
            tables: split_list(self.tables.as_deref()).map(str::to_string).collect(),
            action_types: split_list(self.action_types.as_deref())
                .map(str::parse::<ActionType>)
                .collect::<AuditResult<_>>()?,
            attributes: split_list(self.attributes.as_deref())
                .map(str::to_string)
                .collect(),
            value: self.value,
        };

        Ok(HistoryQuery {
            key: self.key.as_deref().map(parse_key),
            filter,
            pagination: PaginationParams::new(self.page, self.per_page),
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct KeyParams {
    pub key: String,
}

fn split_list(raw: Option<&str>) -> impl Iterator<Item = &str> {
    raw.unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
}

/// A JSON key (`7`, `{"id": 7}`) or, failing that, the raw text as a string key.
pub fn parse_key(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

#[tracing::instrument(skip(state, params))]
async fn get_history(
    State(state): State<FeatureState>,
    Path(entity): Path<String>,
    Query(params): Query<HistoryParams>,
) -> AuditResult<Response> {
    let query = params.into_query()?;
    let page = queries::history(&state, &entity, &query).await?;

    let meta = json!({ "pagination": page.pagination });
    Ok((
        StatusCode::OK,
        Json(ApiResponse::success_with_meta(page.items, meta)),
    )
        .into_response())
}

#[tracing::instrument(skip(state))]
async fn list_versions(
    State(state): State<FeatureState>,
    Path(entity): Path<String>,
    Query(params): Query<KeyParams>,
) -> AuditResult<Response> {
    let ids = queries::record_version_ids(&state, &entity, &parse_key(&params.key)).await?;
    Ok(ApiResponse::success(ids).into_response())
}

#[tracing::instrument(skip(state))]
async fn get_version(
    State(state): State<FeatureState>,
    Path((entity, action_id)): Path<(String, i64)>,
) -> AuditResult<Response> {
    let version = queries::load_version(&state, &entity, action_id)
        .await?
        .ok_or_else(|| AuditError::not_found("Version", action_id))?;
    Ok(ApiResponse::success(version).into_response())
}

#[tracing::instrument(skip(state))]
async fn get_attribute_versions(
    State(state): State<FeatureState>,
    Path((entity, attribute)): Path<(String, String)>,
    Query(params): Query<KeyParams>,
) -> AuditResult<Response> {
    let versions =
        queries::attribute_versions(&state, &entity, &parse_key(&params.key), &attribute).await?;
    Ok(ApiResponse::success(versions).into_response())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_params_to_query() {
        let params = HistoryParams {
            key: Some(r#"{"id": 4}"#.into()),
            user_ids: Some("1, 2,".into()),
            action_types: Some("insert,UPDATE".into()),
            tables: Some("comment,public.tags".into()),
            page: Some(2),
            ..Default::default()
        };

        let query = params.into_query().unwrap();
        assert_eq!(query.key, Some(json!({"id": 4})));
        assert_eq!(query.filter.user_ids, vec![1, 2]);
        assert_eq!(
            query.filter.action_types,
            vec![ActionType::Insert, ActionType::Update]
        );
        assert_eq!(query.filter.tables, vec!["comment", "public.tags"]);
        assert_eq!(query.pagination.page(), 2);
        assert!(query.filter.attributes.is_empty());
    }

    #[test]
    fn test_invalid_list_items_rejected() {
        let params = HistoryParams {
            user_ids: Some("1,abc".into()),
            ..Default::default()
        };
        assert!(matches!(params.into_query(), Err(AuditError::Input(_))));

        let params = HistoryParams {
            action_types: Some("MERGE".into()),
            ..Default::default()
        };
        assert!(params.into_query().is_err());
    }

    #[test]
    fn test_parse_key() {
        assert_eq!(parse_key("7"), json!(7));
        assert_eq!(parse_key("abc"), json!("abc"));
        assert_eq!(parse_key(r#"{"a": 1, "b": 2}"#), json!({"a": 1, "b": 2}));
    }

    #[test]
    fn test_routes_structure() {
        let router = history_routes();
        assert!(format!("{:?}", router).contains("Router"));
    }
}
