//! JSON HTTP API.
//!
//! Every route lives under `/api/v1`. All of them except health,
//! register and login need `Authorization: Bearer <token>`.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `POST` | `/auth/register` | Create an account, returns a token |
//! | `POST` | `/auth/login` | Exchange credentials for a token |
//! | `POST` | `/auth/refresh` | Fresh token for a still-valid one |
//! | `GET` `PUT` | `/users/me` | Profile / change username or email |
//! | `POST` | `/users/change-password` | Needs the current password |
//! | `GET` `PUT` | `/users/me/settings` | Default email, reminders, model |
//! | `GET`  | `/ai/models` | Models users may pick |
//! | `GET` `POST` | `/conversations` | List / create |
//! | `GET` `PUT` `DELETE` | `/conversations/{id}` | Detail with messages / rename / delete |
//! | `GET` `POST` | `/conversations/{id}/messages` | Transcript / one blocking turn |
//! | `POST` | `/conversations/{id}/messages/stream` | Streamed turn (SSE: `chunk`, `complete`, `error`) |
//! | `DELETE` | `/conversations/{id}/messages/{message_id}` | Remove one message |
//! | `POST` | `/organize/to-document` | Conversation to document (+ task) |
//! | `POST` | `/organize/suggestions` | Preview: summary, title, key points, tags |
//! | `GET` `POST` | `/documents` | Search (`q`, `tags`) / create |
//! | `GET` `PUT` `DELETE` | `/documents/{id}` | Read / update / delete |
//! | `GET` `POST` | `/tasks` | List (`status`) / create |
//! | `GET` `PUT` `DELETE` | `/tasks/{id}` | Read / update / delete |
//! | `POST` | `/tasks/{id}/complete` | Mark completed |
//! | `POST` | `/tasks/{id}/send-reminder` | Send the reminder now |
//! | `GET`  | `/notifications` | Reminder history (`task_id`) |
//! | `GET`  | `/scheduler/status` | Scheduler state and last tick |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "title must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `unauthorized` (401), `not_found` (404),
//! `upstream_timeout` (504), `upstream_*` and `notification_failed` (502),
//! `internal` (500).

use std::future::Future;
use std::sync::Arc;

use axum::{
    extract::{FromRequestParts, Path, Query, State},
    http::{header::AUTHORIZATION, request::Parts, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{delete, get, post},
    Json, Router,
};
use chrono::Utc;
use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use mindflow_core::models::{
    new_id, Conversation, Document, DocumentFilter, Message, NotificationRecord, Task, TaskStatus,
    User, UserSettings,
};
use mindflow_core::store::Store;

use crate::assistant::Assistant;
use crate::auth::{Authenticator, TokenAuthenticator};
use crate::chat::ChatService;
use crate::config::Config;
use crate::error::{owned, ServiceError};
use crate::llm::{GenerationError, TextGenerator};
use crate::notify::Notifier;
use crate::organize::{OrganizeOutcome, OrganizePipeline, OrganizeRequest, Suggestions};
use crate::scheduler::{ReminderScheduler, SchedulerStatus};
use crate::tasks::{NewTask, TaskPatch, TaskService};

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn Store>,
    pub auth: Arc<TokenAuthenticator>,
    pub chat: Arc<ChatService>,
    pub organize: Arc<OrganizePipeline>,
    pub tasks: Arc<TaskService>,
    pub scheduler: Arc<ReminderScheduler>,
}

impl AppState {
    /// Wire every service from its collaborators.
    pub fn new(
        config: Config,
        store: Arc<dyn Store>,
        generator: Arc<dyn TextGenerator>,
        notifier: Arc<dyn Notifier>,
        secret: impl Into<Vec<u8>>,
    ) -> Self {
        let assistant = Assistant::new(generator.clone(), config.organize.clone());
        Self {
            auth: Arc::new(TokenAuthenticator::new(
                store.clone(),
                secret,
                config.auth.token_ttl_secs,
            )
            .with_password_iterations(config.auth.password_iterations)),
            chat: Arc::new(ChatService::new(store.clone(), generator)),
            organize: Arc::new(OrganizePipeline::new(store.clone(), assistant)),
            tasks: Arc::new(TaskService::new(store.clone())),
            scheduler: Arc::new(ReminderScheduler::new(
                store.clone(),
                notifier,
                &config.scheduler,
            )),
            store,
            config: Arc::new(config),
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api = Router::new()
        .route("/health", get(handle_health))
        .route("/auth/register", post(handle_register))
        .route("/auth/login", post(handle_login))
        .route("/auth/refresh", post(handle_refresh))
        .route("/users/me", get(handle_get_me).put(handle_put_me))
        .route("/users/change-password", post(handle_change_password))
        .route(
            "/users/me/settings",
            get(handle_get_settings).put(handle_put_settings),
        )
        .route("/ai/models", get(handle_models))
        .route(
            "/conversations",
            get(handle_list_conversations).post(handle_create_conversation),
        )
        .route(
            "/conversations/{id}",
            get(handle_get_conversation)
                .put(handle_rename_conversation)
                .delete(handle_delete_conversation),
        )
        .route(
            "/conversations/{id}/messages",
            get(handle_list_messages).post(handle_send_message),
        )
        .route(
            "/conversations/{id}/messages/stream",
            post(handle_stream_message),
        )
        .route(
            "/conversations/{id}/messages/{message_id}",
            delete(handle_delete_message),
        )
        .route("/organize/to-document", post(handle_organize))
        .route("/organize/suggestions", post(handle_suggestions))
        .route(
            "/documents",
            get(handle_list_documents).post(handle_create_document),
        )
        .route(
            "/documents/{id}",
            get(handle_get_document)
                .put(handle_update_document)
                .delete(handle_delete_document),
        )
        .route("/tasks", get(handle_list_tasks).post(handle_create_task))
        .route(
            "/tasks/{id}",
            get(handle_get_task)
                .put(handle_update_task)
                .delete(handle_delete_task),
        )
        .route("/tasks/{id}/complete", post(handle_complete_task))
        .route("/tasks/{id}/send-reminder", post(handle_send_reminder))
        .route("/notifications", get(handle_list_notifications))
        .route("/scheduler/status", get(handle_scheduler_status));

    Router::new()
        .nest("/api/v1", api)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Serve the API on `[server].bind` until `shutdown` resolves.
pub async fn run_server(
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let bind_addr = state.config.server.bind.clone();
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(addr = %bind_addr, "HTTP server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

/// Internal error type that converts into an Axum HTTP response.
pub struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl AppError {
    fn new(status: StatusCode, code: &str, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.to_string(),
            message: message.into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError::new(StatusCode::BAD_REQUEST, "bad_request", message)
}

fn unauthorized(message: impl Into<String>) -> AppError {
    AppError::new(StatusCode::UNAUTHORIZED, "unauthorized", message)
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        let message = err.to_string();
        match err {
            ServiceError::NotFound(_) => AppError::new(StatusCode::NOT_FOUND, "not_found", message),
            ServiceError::Invalid(_) => bad_request(message),
            ServiceError::Generation { source, .. } => {
                let status = match source {
                    GenerationError::Timeout => StatusCode::GATEWAY_TIMEOUT,
                    _ => StatusCode::BAD_GATEWAY,
                };
                AppError::new(status, source.code(), message)
            }
            ServiceError::Notification(_) => {
                AppError::new(StatusCode::BAD_GATEWAY, "notification_failed", message)
            }
            ServiceError::Storage(e) => {
                tracing::error!(error = %format!("{e:#}"), "storage error");
                AppError::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal",
                    "internal error",
                )
            }
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        ServiceError::Storage(err).into()
    }
}

type ApiResult<T> = Result<T, AppError>;

// ============ Authentication ============

/// Id of the user named by the request's bearer token.
pub struct CurrentUser(pub String);

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, AppError> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| unauthorized("missing bearer token"))?;
        let token = header
            .strip_prefix("Bearer ")
            .ok_or_else(|| unauthorized("expected a bearer token"))?;
        let user_id = state
            .auth
            .validate_token(token.trim(), Utc::now())
            .ok_or_else(|| unauthorized("invalid or expired token"))?;
        Ok(CurrentUser(user_id))
    }
}

#[derive(Deserialize)]
struct RegisterRequest {
    username: String,
    password: String,
    #[serde(default)]
    email: Option<String>,
}

#[derive(Deserialize)]
struct LoginRequest {
    username: String,
    password: String,
}

#[derive(Serialize)]
struct TokenResponse {
    access_token: String,
    token_type: &'static str,
    expires_in: u64,
    user: User,
}

fn token_response(state: &AppState, user: User) -> ApiResult<TokenResponse> {
    Ok(TokenResponse {
        access_token: state.auth.issue_token(&user, Utc::now())?,
        token_type: "bearer",
        expires_in: state.config.auth.token_ttl_secs,
        user,
    })
}

async fn handle_register(
    State(state): State<AppState>,
    Json(body): Json<RegisterRequest>,
) -> ApiResult<(StatusCode, Json<TokenResponse>)> {
    let user = state
        .auth
        .register(&body.username, &body.password, body.email.as_deref(), Utc::now())
        .await?;
    Ok((StatusCode::CREATED, Json(token_response(&state, user)?)))
}

async fn handle_login(
    State(state): State<AppState>,
    Json(body): Json<LoginRequest>,
) -> ApiResult<Json<TokenResponse>> {
    let user = state
        .auth
        .verify(&body.username, &body.password)
        .await?
        .ok_or_else(|| unauthorized("invalid username or password"))?;
    Ok(Json(token_response(&state, user)?))
}

async fn handle_refresh(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
) -> ApiResult<Json<TokenResponse>> {
    let user = state
        .store
        .get_user(&user_id)
        .await?
        .ok_or_else(|| unauthorized("account no longer exists"))?;
    Ok(Json(token_response(&state, user)?))
}

// ============ Account ============

#[derive(Deserialize)]
struct ProfilePatch {
    username: Option<String>,
    /// Empty string clears the email.
    email: Option<String>,
}

#[derive(Deserialize)]
struct PasswordChange {
    current_password: String,
    new_password: String,
}

async fn handle_get_me(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
) -> ApiResult<Json<User>> {
    let user = state
        .store
        .get_user(&user_id)
        .await?
        .ok_or(ServiceError::NotFound("user"))?;
    Ok(Json(user))
}

async fn handle_put_me(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Json(patch): Json<ProfilePatch>,
) -> ApiResult<Json<User>> {
    let user = state
        .auth
        .update_profile(&user_id, patch.username.as_deref(), patch.email.as_deref())
        .await?;
    Ok(Json(user))
}

async fn handle_change_password(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Json(body): Json<PasswordChange>,
) -> ApiResult<StatusCode> {
    state
        .auth
        .change_password(&user_id, &body.current_password, &body.new_password)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ Settings and models ============

#[derive(Deserialize)]
struct SettingsPatch {
    /// Empty string clears the default email.
    default_email: Option<String>,
    reminder_enabled: Option<bool>,
    default_model: Option<String>,
}

async fn handle_get_settings(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
) -> ApiResult<Json<UserSettings>> {
    Ok(Json(state.store.get_settings(&user_id).await?))
}

async fn handle_put_settings(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Json(patch): Json<SettingsPatch>,
) -> ApiResult<Json<UserSettings>> {
    let mut settings = state.store.get_settings(&user_id).await?;
    if let Some(email) = patch.default_email {
        let email = email.trim();
        if !email.is_empty() && !email.contains('@') {
            return Err(bad_request("default_email is not a valid address"));
        }
        settings.default_email = Some(email.to_string()).filter(|e| !e.is_empty());
    }
    if let Some(enabled) = patch.reminder_enabled {
        settings.reminder_enabled = enabled;
    }
    if let Some(model) = patch.default_model {
        if !state.config.llm.available_models().contains(&model) {
            return Err(bad_request(format!("unknown model: {}", model)));
        }
        settings.default_model = Some(model);
    }
    state.store.put_settings(&settings).await?;
    Ok(Json(settings))
}

#[derive(Serialize)]
struct ModelsResponse {
    default_model: String,
    models: Vec<String>,
}

async fn handle_models(
    State(state): State<AppState>,
    CurrentUser(_): CurrentUser,
) -> Json<ModelsResponse> {
    Json(ModelsResponse {
        default_model: state.config.llm.default_model.clone(),
        models: state.config.llm.available_models(),
    })
}

// ============ Conversations and messages ============

#[derive(Deserialize)]
struct ConversationBody {
    #[serde(default)]
    title: Option<String>,
}

#[derive(Serialize)]
struct ConversationDetail {
    #[serde(flatten)]
    conversation: Conversation,
    messages: Vec<Message>,
}

#[derive(Deserialize)]
struct MessageBody {
    content: String,
}

#[derive(Serialize)]
struct MessageExchange {
    user_message: Message,
    assistant_message: Message,
}

async fn owned_conversation(
    state: &AppState,
    user_id: &str,
    id: &str,
) -> Result<Conversation, ServiceError> {
    owned(
        state.store.get_conversation(id).await?,
        |c| c.owner_id.as_str(),
        user_id,
        "conversation",
    )
}

async fn handle_list_conversations(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
) -> ApiResult<Json<Vec<Conversation>>> {
    Ok(Json(state.store.list_conversations(&user_id).await?))
}

async fn handle_create_conversation(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Json(body): Json<ConversationBody>,
) -> ApiResult<(StatusCode, Json<Conversation>)> {
    let now = Utc::now();
    let title = body
        .title
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .unwrap_or("New conversation");
    let conversation = Conversation {
        id: new_id(),
        owner_id: user_id,
        title: title.to_string(),
        created_at: now,
        updated_at: now,
    };
    state.store.create_conversation(&conversation).await?;
    Ok((StatusCode::CREATED, Json(conversation)))
}

async fn handle_get_conversation(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(id): Path<String>,
) -> ApiResult<Json<ConversationDetail>> {
    let conversation = owned_conversation(&state, &user_id, &id).await?;
    let messages = state.store.list_messages(&id).await?;
    Ok(Json(ConversationDetail {
        conversation,
        messages,
    }))
}

async fn handle_rename_conversation(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(id): Path<String>,
    Json(body): Json<ConversationBody>,
) -> ApiResult<Json<Conversation>> {
    owned_conversation(&state, &user_id, &id).await?;
    let title = body
        .title
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| bad_request("title must not be empty"))?;
    state.store.rename_conversation(&id, title, Utc::now()).await?;
    Ok(Json(owned_conversation(&state, &user_id, &id).await?))
}

async fn handle_delete_conversation(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    owned_conversation(&state, &user_id, &id).await?;
    state.store.delete_conversation(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn handle_list_messages(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<Message>>> {
    owned_conversation(&state, &user_id, &id).await?;
    Ok(Json(state.store.list_messages(&id).await?))
}

async fn handle_delete_message(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path((id, message_id)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    owned_conversation(&state, &user_id, &id).await?;
    if !state.store.delete_message(&id, &message_id).await? {
        return Err(ServiceError::NotFound("message").into());
    }
    Ok(StatusCode::NO_CONTENT)
}

async fn handle_send_message(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(id): Path<String>,
    Json(body): Json<MessageBody>,
) -> ApiResult<Json<MessageExchange>> {
    let (user_message, assistant_message) = state
        .chat
        .send_message(&user_id, &id, &body.content, Utc::now())
        .await?;
    Ok(Json(MessageExchange {
        user_message,
        assistant_message,
    }))
}

async fn handle_stream_message(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(id): Path<String>,
    Json(body): Json<MessageBody>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, axum::Error>>>> {
    let events = state
        .chat
        .stream_reply(&user_id, &id, &body.content, Utc::now())
        .await?;
    let stream = events.map(|event| Event::default().event(event.name()).json_data(&event));
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

// ============ Organize ============

#[derive(Deserialize)]
struct SuggestionsRequest {
    conversation_id: String,
}

async fn handle_organize(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Json(request): Json<OrganizeRequest>,
) -> ApiResult<(StatusCode, Json<OrganizeOutcome>)> {
    let outcome = state
        .organize
        .organize(&user_id, &request, Utc::now())
        .await?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

async fn handle_suggestions(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Json(request): Json<SuggestionsRequest>,
) -> ApiResult<Json<Suggestions>> {
    Ok(Json(
        state
            .organize
            .suggest(&user_id, &request.conversation_id)
            .await?,
    ))
}

// ============ Documents ============

#[derive(Deserialize)]
struct DocumentQuery {
    #[serde(default)]
    q: Option<String>,
    /// Comma-separated; a document must carry every listed tag.
    #[serde(default)]
    tags: Option<String>,
}

#[derive(Deserialize)]
struct NewDocument {
    title: String,
    content: String,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
}

#[derive(Deserialize)]
struct DocumentPatch {
    title: Option<String>,
    content: Option<String>,
    summary: Option<String>,
    tags: Option<Vec<String>>,
}

fn clean_tags(tags: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for tag in tags.iter().map(|t| t.trim()).filter(|t| !t.is_empty()) {
        if !out.iter().any(|t| t == tag) {
            out.push(tag.to_string());
        }
    }
    out
}

async fn owned_document(
    state: &AppState,
    user_id: &str,
    id: &str,
) -> Result<Document, ServiceError> {
    owned(
        state.store.get_document(id).await?,
        |d| d.owner_id.as_str(),
        user_id,
        "document",
    )
}

async fn handle_list_documents(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Query(query): Query<DocumentQuery>,
) -> ApiResult<Json<Vec<Document>>> {
    let filter = DocumentFilter {
        query: query.q,
        tags: query
            .tags
            .map(|t| clean_tags(&t.split(',').map(str::to_string).collect::<Vec<_>>()))
            .unwrap_or_default(),
    };
    Ok(Json(state.store.list_documents(&user_id, &filter).await?))
}

async fn handle_create_document(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Json(body): Json<NewDocument>,
) -> ApiResult<(StatusCode, Json<Document>)> {
    let title = body.title.trim();
    if title.is_empty() {
        return Err(bad_request("title must not be empty"));
    }
    let now = Utc::now();
    let document = Document {
        id: new_id(),
        owner_id: user_id,
        title: title.to_string(),
        content: body.content,
        summary: body.summary,
        source_conversation_id: None,
        tags: clean_tags(&body.tags),
        created_at: now,
        updated_at: now,
    };
    state.store.create_document(&document, None).await?;
    Ok((StatusCode::CREATED, Json(document)))
}

async fn handle_get_document(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(id): Path<String>,
) -> ApiResult<Json<Document>> {
    Ok(Json(owned_document(&state, &user_id, &id).await?))
}

async fn handle_update_document(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(id): Path<String>,
    Json(patch): Json<DocumentPatch>,
) -> ApiResult<Json<Document>> {
    let mut document = owned_document(&state, &user_id, &id).await?;
    if let Some(title) = patch.title {
        let title = title.trim();
        if title.is_empty() {
            return Err(bad_request("title must not be empty"));
        }
        document.title = title.to_string();
    }
    if let Some(content) = patch.content {
        document.content = content;
    }
    if let Some(summary) = patch.summary {
        document.summary = Some(summary).filter(|s| !s.trim().is_empty());
    }
    if let Some(tags) = patch.tags {
        document.tags = clean_tags(&tags);
    }
    document.updated_at = Utc::now();
    if !state.store.update_document(&document).await? {
        return Err(ServiceError::NotFound("document").into());
    }
    Ok(Json(document))
}

async fn handle_delete_document(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    owned_document(&state, &user_id, &id).await?;
    state.store.delete_document(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ============ Tasks ============

#[derive(Deserialize)]
struct TaskQuery {
    #[serde(default)]
    status: Option<String>,
}

async fn handle_list_tasks(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Query(query): Query<TaskQuery>,
) -> ApiResult<Json<Vec<Task>>> {
    let status = match query.status.as_deref() {
        None | Some("") => None,
        Some(s) => Some(
            TaskStatus::parse(s).ok_or_else(|| bad_request(format!("unknown status: {}", s)))?,
        ),
    };
    Ok(Json(state.tasks.list(&user_id, status).await?))
}

async fn handle_create_task(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Json(body): Json<NewTask>,
) -> ApiResult<(StatusCode, Json<Task>)> {
    let task = state.tasks.create(&user_id, &body, Utc::now()).await?;
    Ok((StatusCode::CREATED, Json(task)))
}

async fn handle_get_task(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(id): Path<String>,
) -> ApiResult<Json<Task>> {
    Ok(Json(state.tasks.get(&user_id, &id).await?))
}

async fn handle_update_task(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(id): Path<String>,
    Json(patch): Json<TaskPatch>,
) -> ApiResult<Json<Task>> {
    Ok(Json(
        state.tasks.update(&user_id, &id, &patch, Utc::now()).await?,
    ))
}

async fn handle_delete_task(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    state.tasks.delete(&user_id, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn handle_complete_task(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(id): Path<String>,
) -> ApiResult<Json<Task>> {
    Ok(Json(state.tasks.complete(&user_id, &id, Utc::now()).await?))
}

async fn handle_send_reminder(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(id): Path<String>,
) -> ApiResult<Json<NotificationRecord>> {
    Ok(Json(
        state
            .scheduler
            .dispatcher()
            .send_now(&user_id, &id, Utc::now())
            .await?,
    ))
}

// ============ Notifications and scheduler ============

#[derive(Deserialize)]
struct NotificationQuery {
    #[serde(default)]
    task_id: Option<String>,
}

async fn handle_list_notifications(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Query(query): Query<NotificationQuery>,
) -> ApiResult<Json<Vec<NotificationRecord>>> {
    Ok(Json(
        state
            .store
            .list_notifications(&user_id, query.task_id.as_deref())
            .await?,
    ))
}

async fn handle_scheduler_status(
    State(state): State<AppState>,
    CurrentUser(_): CurrentUser,
) -> Json<SchedulerStatus> {
    Json(state.scheduler.status())
}
