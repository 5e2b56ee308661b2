use crate::error::ApiResult;
use crate::render::Renderer;
use axum::{
    extract::{rejection::FormRejection, Path, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse},
    routing::{get, post},
    Form, Router,
};
use lvl_core::{input, LevelResult, LevelingEngine, SessionId, SessionSnapshot};
use lvl_storage::AnyStore;
use serde::Deserialize;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Outside the session token alphabet, so no session can shadow it.
pub const HEALTH_PATH: &str = "/.health";

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<LevelingEngine<AnyStore>>,
    pub renderer: Arc<Renderer>,
}

#[derive(Debug, Deserialize)]
pub struct TaskForm {
    name: Option<String>,
    xp: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CompleteForm {
    task: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UnlockableForm {
    level: Option<String>,
    description: Option<String>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(new_session))
        .route(HEALTH_PATH, get(|| async { "ok" }))
        .route("/:session", get(session_page))
        .route("/add-task/:session", post(add_task))
        .route("/add-xp/:session", post(complete_task))
        .route("/add-unlockable/:session", post(add_unlockable))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Store calls block on SQLite, so they run off the async workers.
async fn blocking<T, F>(work: F) -> ApiResult<T>
where
    F: FnOnce() -> LevelResult<T> + Send + 'static,
    T: Send + 'static,
{
    Ok(tokio::task::spawn_blocking(work).await??)
}

async fn new_session(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let engine = state.engine.clone();
    let handle = blocking(move || engine.resolve_or_create(None)).await?;
    info!(event = "session_created", session = %handle.id);
    Ok((
        StatusCode::FOUND,
        [(header::LOCATION, format!("/{}", handle.id))],
    ))
}

async fn session_page(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> ApiResult<Html<String>> {
    let engine = state.engine.clone();
    let (handle, snapshot) = blocking(move || {
        let handle = engine.resolve_or_create(Some(token.as_str()))?;
        let snapshot = engine.snapshot(&handle.id)?;
        Ok((handle, snapshot))
    })
    .await?;
    if handle.created {
        info!(event = "session_created", session = %handle.id);
    }
    Ok(Html(state.renderer.page(&snapshot)?))
}

async fn add_task(
    State(state): State<AppState>,
    Path(token): Path<String>,
    form: Result<Form<TaskForm>, FormRejection>,
) -> ApiResult<Html<String>> {
    let Form(form) = form?;
    let session = SessionId::parse(&token)?;
    let name = input::required("name", form.name.as_deref())?.to_string();
    let xp = input::parse_integer("xp", form.xp.as_deref())?;

    let engine = state.engine.clone();
    let (task, snapshot) = blocking(move || {
        let task = engine.add_task(&session, &name, xp)?;
        Ok((task, engine.snapshot(&session)?))
    })
    .await?;
    info!(
        event = "task_added",
        session = %snapshot.session,
        task_id = task.id,
        xp = task.xp
    );
    render_fragment(&state, &snapshot)
}

async fn complete_task(
    State(state): State<AppState>,
    Path(token): Path<String>,
    form: Result<Form<CompleteForm>, FormRejection>,
) -> ApiResult<Html<String>> {
    let Form(form) = form?;
    let session = SessionId::parse(&token)?;
    let task_id = input::parse_integer("task", form.task.as_deref())?;

    let engine = state.engine.clone();
    let (result, snapshot) = blocking(move || {
        let result = engine.complete_task(&session, task_id)?;
        Ok((result, engine.snapshot(&session)?))
    })
    .await?;
    info!(
        event = "task_completed",
        session = %snapshot.session,
        task_id = result.task_id,
        xp = result.xp_awarded,
        total_xp = result.total_xp,
        level = result.level
    );
    for level in &result.newly_unlocked {
        let rewards = result
            .rewards
            .iter()
            .filter(|reward| reward.level == *level)
            .count();
        info!(
            event = "level_unlocked",
            session = %snapshot.session,
            level = *level,
            rewards = rewards
        );
    }
    render_fragment(&state, &snapshot)
}

async fn add_unlockable(
    State(state): State<AppState>,
    Path(token): Path<String>,
    form: Result<Form<UnlockableForm>, FormRejection>,
) -> ApiResult<Html<String>> {
    let Form(form) = form?;
    let session = SessionId::parse(&token)?;
    let level = input::parse_integer("level", form.level.as_deref())?;
    let description = input::required("description", form.description.as_deref())?.to_string();

    let engine = state.engine.clone();
    let (registration, snapshot) = blocking(move || {
        let registration = engine.register_unlockable(&session, level, &description)?;
        Ok((registration, engine.snapshot(&session)?))
    })
    .await?;
    info!(
        event = "unlockable_registered",
        session = %snapshot.session,
        level = registration.unlockable.level,
        created = registration.created,
        unlocked = registration.unlocked
    );
    render_fragment(&state, &snapshot)
}

fn render_fragment(state: &AppState, snapshot: &SessionSnapshot) -> ApiResult<Html<String>> {
    Ok(Html(state.renderer.fragment(snapshot)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Method, Request};
    use http_body_util::BodyExt;
    use lvl_core::ProgressStore;
    use lvl_storage::MemoryStore;
    use tower::ServiceExt;

    fn test_state() -> AppState {
        AppState {
            engine: Arc::new(LevelingEngine::new(AnyStore::Memory(MemoryStore::new()))),
            renderer: Arc::new(Renderer::new().expect("templates compile")),
        }
    }

    async fn send(state: &AppState, method: Method, uri: &str, form: &str) -> (StatusCode, String) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(form.to_string()))
            .expect("request");
        let response = router(state.clone())
            .oneshot(request)
            .await
            .expect("response");
        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("body")
            .to_bytes();
        (status, String::from_utf8_lossy(&bytes).to_string())
    }

    async fn post(state: &AppState, uri: &str, form: &str) -> (StatusCode, String) {
        send(state, Method::POST, uri, form).await
    }

    fn session(token: &str) -> SessionId {
        SessionId::parse(token).expect("token")
    }

    #[tokio::test]
    async fn root_redirects_to_a_fresh_session() {
        let state = test_state();
        let response = router(state.clone())
            .oneshot(Request::get("/").body(Body::empty()).expect("request"))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::FOUND);
        let location = response
            .headers()
            .get(header::LOCATION)
            .and_then(|value| value.to_str().ok())
            .expect("location header")
            .to_string();
        let token = location.trim_start_matches('/');
        let id = session(token);
        assert!(state.engine.store().session_exists(&id).expect("exists"));
    }

    #[tokio::test]
    async fn session_page_renders_full_document_and_creates_session() {
        let state = test_state();
        let (status, body) = send(&state, Method::GET, "/qwer", "").await;

        assert_eq!(status, StatusCode::OK);
        assert!(body.starts_with("<!DOCTYPE html>"));
        assert!(body.contains("Session <code>qwer</code>"));
        assert!(state
            .engine
            .store()
            .session_exists(&session("qwer"))
            .expect("exists"));
    }

    #[tokio::test]
    async fn invalid_session_token_is_rejected() {
        let state = test_state();
        let (status, _) = send(&state, Method::GET, "/bad%20token", "").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn add_task_returns_fragment() {
        let state = test_state();
        let (status, body) = post(&state, "/add-task/abcd", "name=Clean+desk&xp=150").await;

        assert_eq!(status, StatusCode::OK);
        assert!(body.trim_start().starts_with("<div id=\"app\">"));
        assert!(body.contains("Clean desk (150 XP)"));
    }

    #[tokio::test]
    async fn non_numeric_or_missing_xp_is_rejected_not_zeroed() {
        let state = test_state();
        for form in ["name=Clean+desk&xp=lots", "name=Clean+desk", "name=Clean+desk&xp=0"] {
            let (status, _) = post(&state, "/add-task/abcd", form).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{form}");
        }
        let snapshot = state.engine.snapshot(&session("abcd")).expect("snapshot");
        assert!(snapshot.tasks.is_empty());
    }

    #[tokio::test]
    async fn completing_a_task_updates_level_and_rejects_repeats() {
        let state = test_state();
        let abcd = session("abcd");
        let task = state.engine.add_task(&abcd, "Big push", 1_050).expect("task");

        let form = format!("task={}", task.id);
        let (status, body) = post(&state, "/add-xp/abcd", &form).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("Level 1"));
        assert!(body.contains("width: 5%"));

        let (status, body) = post(&state, "/add-xp/abcd", &form).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.contains("already completed"));
        assert_eq!(state.engine.snapshot(&abcd).expect("snapshot").total_xp, 1_050);
    }

    #[tokio::test]
    async fn unknown_task_is_a_bad_request() {
        let state = test_state();
        let (status, body) = post(&state, "/add-xp/abcd", "task=99").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.contains("not found"));

        let (status, _) = post(&state, "/add-xp/abcd", "task=").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unlockable_route_validates_and_unlocks_retroactively() {
        let state = test_state();
        let (status, _) = post(&state, "/add-unlockable/abcd", "level=-1&description=x").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = post(&state, "/add-unlockable/abcd", "level=2").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = post(
            &state,
            "/add-unlockable/abcd",
            "level=0&description=Gold+star",
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("<li class=\"unlocked\">Level 0: Gold star</li>"));
    }

    #[tokio::test]
    async fn mutating_routes_reject_get() {
        let state = test_state();
        for uri in ["/add-task/abcd", "/add-xp/abcd", "/add-unlockable/abcd"] {
            let (status, _) = send(&state, Method::GET, uri, "").await;
            assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED, "{uri}");
        }
    }

    #[tokio::test]
    async fn health_check_does_not_shadow_a_session() {
        let state = test_state();
        let (status, body) = send(&state, Method::GET, HEALTH_PATH, "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "ok");
        assert!(SessionId::parse(HEALTH_PATH.trim_start_matches('/')).is_err());

        let (status, body) = send(&state, Method::GET, "/health", "").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("Session <code>health</code>"));
        assert!(state
            .engine
            .store()
            .session_exists(&session("health"))
            .expect("exists"));
    }

    #[tokio::test]
    async fn malformed_form_bodies_are_bad_requests() {
        let state = test_state();
        let request = Request::post("/add-task/abcd")
            .body(Body::from("name=Clean+desk&xp=5"))
            .expect("request");
        let response = router(state.clone())
            .oneshot(request)
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let (status, body) = post(&state, "/add-task/abcd", "name=Clean+desk&xp=5&xp=6").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.starts_with("invalid form"));
        let snapshot = state.engine.snapshot(&session("abcd")).expect("snapshot");
        assert!(snapshot.tasks.is_empty());
    }
}
