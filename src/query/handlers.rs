use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::{HeaderMap, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::get,
};
use std::sync::Arc;

use super::forward::Forwarder;
use super::protocol::{
    ENDPOINT_ALL, ENDPOINT_INSTANCE_FOR_KEY, ENDPOINT_INSTANCES, ENDPOINT_INSTANCES_FOR_STORE,
    ENDPOINT_KEY_VALUE, ENDPOINT_RANGE, ENDPOINT_WINDOWED, ErrorResponse, FORWARDED_HEADER,
    HostStoreInfo, KeyValueResponse, WindowedValue,
};
use super::service::{QueryService, Routed};
use crate::directory::assignment::NodeInfo;
use crate::error::StateError;
use crate::store::iter::{EntryIter, WindowIter};
use crate::store::types::Entry;

pub fn router(query: Arc<QueryService>, forwarder: Arc<Forwarder>) -> Router {
    Router::new()
        .route(ENDPOINT_KEY_VALUE, get(handle_get))
        .route(ENDPOINT_ALL, get(handle_all))
        .route(ENDPOINT_RANGE, get(handle_range))
        .route(ENDPOINT_WINDOWED, get(handle_windowed))
        .route(ENDPOINT_INSTANCES, get(handle_instances))
        .route(ENDPOINT_INSTANCES_FOR_STORE, get(handle_instances_for_store))
        .route(ENDPOINT_INSTANCE_FOR_KEY, get(handle_instance_for_key))
        .layer(Extension(query))
        .layer(Extension(forwarder))
}

pub fn status_for(error: &StateError) -> StatusCode {
    match error {
        StateError::StoreNotFound(_)
        | StateError::KeyNotFound { .. }
        | StateError::KeyUnresolvable { .. } => StatusCode::NOT_FOUND,
        StateError::StoreNotLocal { .. } | StateError::NodeUnreachable { .. } => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        StateError::StoreKindMismatch { .. } | StateError::ValueTypeMismatch { .. } => {
            StatusCode::BAD_REQUEST
        }
    }
}

pub struct ApiError(pub StateError);

impl From<StateError> for ApiError {
    fn from(error: StateError) -> Self {
        Self(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status.is_server_error() {
            tracing::warn!("{}", self.0);
        } else {
            tracing::debug!("{}", self.0);
        }
        (
            status,
            Json(ErrorResponse {
                error: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

fn is_forwarded(headers: &HeaderMap) -> bool {
    headers.contains_key(FORWARDED_HEADER)
}

fn ok<T: serde::Serialize>(body: T) -> Response {
    (StatusCode::OK, Json(body)).into_response()
}

fn reply<T: serde::Serialize>(result: Result<T, StateError>) -> Response {
    match result {
        Ok(body) => ok(body),
        Err(e) => ApiError(e).into_response(),
    }
}

/// Relays the request to `owner`; an owner that cannot be reached is dropped
/// from the directory before the error is returned.
async fn relay(query: &QueryService, forwarder: &Forwarder, owner: NodeInfo, uri: &Uri) -> Response {
    match forwarder.forward(&owner, uri.path()).await {
        Ok((status, body)) => (status, Json(body)).into_response(),
        Err(e) => {
            if let StateError::NodeUnreachable { node, .. } = &e
                && let Some(report) = query.report_unreachable(node)
            {
                tracing::info!(
                    "Took over {} partition(s) after losing {}",
                    report.assigned.len(),
                    node
                );
            }
            ApiError(e).into_response()
        }
    }
}

fn entries(iter: EntryIter) -> Vec<Entry> {
    iter.collect()
}

pub async fn handle_get(
    Extension(query): Extension<Arc<QueryService>>,
    Extension(forwarder): Extension<Arc<Forwarder>>,
    Path((store, key)): Path<(String, String)>,
    headers: HeaderMap,
    uri: Uri,
) -> Response {
    if is_forwarded(&headers) {
        return reply(
            query
                .local_get(&store, &key)
                .map(|value| KeyValueResponse { key, value }),
        );
    }

    match query.get(&store, &key) {
        Ok(Routed::Local(value)) => ok(KeyValueResponse { key, value }),
        Ok(Routed::Redirect(owner)) => relay(&query, &forwarder, owner, &uri).await,
        Err(e) => ApiError(e).into_response(),
    }
}

pub async fn handle_all(
    Extension(query): Extension<Arc<QueryService>>,
    Extension(forwarder): Extension<Arc<Forwarder>>,
    Path(store): Path<String>,
    headers: HeaderMap,
    uri: Uri,
) -> Response {
    if is_forwarded(&headers) {
        return reply(query.local_all(&store).map(entries));
    }

    match query.all(&store).map(|routed| routed.map(entries)) {
        Ok(Routed::Local(body)) => ok(body),
        Ok(Routed::Redirect(owner)) => relay(&query, &forwarder, owner, &uri).await,
        Err(e) => ApiError(e).into_response(),
    }
}

pub async fn handle_range(
    Extension(query): Extension<Arc<QueryService>>,
    Extension(forwarder): Extension<Arc<Forwarder>>,
    Path((store, from, to)): Path<(String, String, String)>,
    headers: HeaderMap,
    uri: Uri,
) -> Response {
    if is_forwarded(&headers) {
        return reply(query.local_range(&store, &from, &to).map(entries));
    }

    match query
        .range(&store, &from, &to)
        .map(|routed| routed.map(entries))
    {
        Ok(Routed::Local(body)) => ok(body),
        Ok(Routed::Redirect(owner)) => relay(&query, &forwarder, owner, &uri).await,
        Err(e) => ApiError(e).into_response(),
    }
}

pub async fn handle_windowed(
    Extension(query): Extension<Arc<QueryService>>,
    Extension(forwarder): Extension<Arc<Forwarder>>,
    Path((store, key, from, to)): Path<(String, String, i64, i64)>,
    headers: HeaderMap,
    uri: Uri,
) -> Response {
    let windows = |iter: WindowIter| -> Vec<WindowedValue> {
        iter.map(|(window_start, value)| WindowedValue {
            key: key.clone(),
            window_start,
            value,
        })
        .collect()
    };

    if is_forwarded(&headers) {
        return reply(query.local_fetch_window(&store, &key, from, to).map(windows));
    }

    match query
        .fetch_window(&store, &key, from, to)
        .map(|routed| routed.map(windows))
    {
        Ok(Routed::Local(body)) => ok(body),
        Ok(Routed::Redirect(owner)) => relay(&query, &forwarder, owner, &uri).await,
        Err(e) => ApiError(e).into_response(),
    }
}

pub async fn handle_instances(
    Extension(query): Extension<Arc<QueryService>>,
) -> (StatusCode, Json<Vec<HostStoreInfo>>) {
    let nodes = query.all_nodes();
    (
        StatusCode::OK,
        Json(nodes.iter().map(HostStoreInfo::from).collect()),
    )
}

pub async fn handle_instances_for_store(
    Extension(query): Extension<Arc<QueryService>>,
    Path(store): Path<String>,
) -> Response {
    reply(
        query
            .nodes_for_store(&store)
            .map(|nodes| nodes.iter().map(HostStoreInfo::from).collect::<Vec<_>>()),
    )
}

pub async fn handle_instance_for_key(
    Extension(query): Extension<Arc<QueryService>>,
    Path((store, key)): Path<(String, String)>,
) -> Response {
    reply(
        query
            .node_for_key(&store, &key)
            .map(|node| HostStoreInfo::from(&node)),
    )
}
