//! HTTP routes
//!
//! - `GET  /api/v1/sse/analysis-notifications?token=` live notification stream
//! - `GET  /api/v1/tasks/{task_id}` task status polling
//! - `POST /api/v1/tasks/{kind}?token=` submit catalog work with a JSON body

use crate::auth::SubscriberResolver;
use crate::error::{handle_rejection, ApiError};
use futures::StreamExt;
use insight_core::{NotificationEvent, SubscriberId, TaskId, TaskMetadata, TaskService};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use warp::http::header::{CACHE_CONTROL, CONTENT_TYPE};
use warp::http::{HeaderValue, Response, StatusCode};
use warp::hyper::Body;
use warp::{Filter, Rejection, Reply};

/// Largest accepted submission body
const MAX_BODY_BYTES: u64 = 1024 * 1024;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    service: Arc<TaskService>,
    resolver: Arc<dyn SubscriberResolver>,
}

impl AppState {
    /// Bundle the service with a resolver
    #[must_use]
    pub fn new(service: Arc<TaskService>, resolver: Arc<dyn SubscriberResolver>) -> Self {
        Self { service, resolver }
    }

    /// Underlying service
    #[inline]
    #[must_use]
    pub fn service(&self) -> &Arc<TaskService> {
        &self.service
    }

    async fn authenticate(&self, token: Option<&str>) -> Result<SubscriberId, ApiError> {
        let Some(token) = token.filter(|t| !t.is_empty()) else {
            return Err(ApiError::Unauthorized);
        };
        match self.resolver.resolve(token).await {
            Some(subscriber) => Ok(subscriber),
            None => {
                tracing::warn!("rejected unknown token");
                Err(ApiError::Unauthorized)
            }
        }
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("service", &self.service)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Default, Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

#[derive(Debug, Serialize)]
struct Submitted {
    task_id: TaskId,
}

/// All routes with JSON error recovery
pub fn routes(state: AppState) -> impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone {
    notifications(state.clone())
        .or(task_status(state.clone()))
        .or(submit_task(state))
        .recover(handle_rejection)
}

fn with_state(state: AppState) -> impl Filter<Extract = (AppState,), Error = Infallible> + Clone {
    warp::any().map(move || state.clone())
}

fn notifications(state: AppState) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    warp::path!("api" / "v1" / "sse" / "analysis-notifications")
        .and(warp::get())
        .and(warp::query::<TokenQuery>())
        .and(with_state(state))
        .and_then(open_notifications)
}

fn task_status(state: AppState) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    warp::path!("api" / "v1" / "tasks" / String)
        .and(warp::get())
        .and(with_state(state))
        .and_then(get_task)
}

fn submit_task(state: AppState) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    warp::path!("api" / "v1" / "tasks" / String)
        .and(warp::post())
        .and(warp::query::<TokenQuery>())
        .and(warp::body::content_length_limit(MAX_BODY_BYTES))
        .and(warp::body::json::<serde_json::Value>())
        .and(with_state(state))
        .and_then(submit)
}

/// `event: <type>\ndata: <json>\n\n` bytes for one notification
fn sse_frame(event: &NotificationEvent) -> String {
    event.to_frame().to_string()
}

async fn open_notifications(query: TokenQuery, state: AppState) -> Result<impl Reply, Rejection> {
    let subscriber = state.authenticate(query.token.as_deref()).await?;
    tracing::info!(%subscriber, "notification stream opened");

    // warp's own SSE writer omits the space after `event:`/`data:`, so the
    // frames are written as-is
    let frames = state
        .service
        .open_stream(subscriber)
        .map(|event| Ok::<_, Infallible>(sse_frame(&event)));

    let mut response = Response::new(Body::wrap_stream(frames));
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert("x-accel-buffering", HeaderValue::from_static("no"));
    Ok(response)
}

async fn get_task(raw_id: String, state: AppState) -> Result<impl Reply, Rejection> {
    let snapshot = raw_id
        .parse::<TaskId>()
        .ok()
        .and_then(|id| state.service.get_task(id))
        .ok_or_else(|| ApiError::TaskNotFound(raw_id.clone()))?;
    Ok(warp::reply::json(&snapshot))
}

async fn submit(
    kind: String,
    query: TokenQuery,
    input: serde_json::Value,
    state: AppState,
) -> Result<impl Reply, Rejection> {
    let subscriber = state.authenticate(query.token.as_deref()).await?;
    let task_id = state
        .service
        .submit_kind(&kind, TaskMetadata::for_subscriber(subscriber), input)
        .map_err(ApiError::from)?;

    Ok(warp::reply::with_status(
        warp::reply::json(&Submitted { task_id }),
        StatusCode::ACCEPTED,
    ))
}
