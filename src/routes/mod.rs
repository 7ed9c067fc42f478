use axum::http::HeaderValue;
use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use tracing::warn;

use crate::{
    auth::{AuthenticatedUser, CompanyScope},
    state::AppState,
};

pub mod ai;
pub mod auth;
pub mod companies;
pub mod dashboard;
pub mod health;
pub mod notes;
pub mod people;
pub mod users;

const MAX_BODY_BYTES: usize = 1024 * 1024;

pub fn create_router(state: AppState) -> Router<()> {
    let cors = cors_layer(state.config.cors_allowed_origin.as_deref());

    let public_routes = Router::new()
        .route("/users", post(users::create_user))
        .route("/auth/login", post(auth::login))
        .route("/auth/refresh-token", post(auth::refresh_token))
        .route("/health", get(health::health_check));

    let private_routes = Router::new()
        .route("/auth/logout", post(auth::logout))
        .route(
            "/users/profile",
            get(users::get_profile).put(users::update_profile),
        )
        .route(
            "/companies",
            get(companies::list_companies).post(companies::create_company),
        )
        .route("/dashboard", get(dashboard::get_dashboard))
        .route_layer(middleware::from_extractor_with_state::<AuthenticatedUser, _>(
            state.clone(),
        ));

    let company_routes = Router::new()
        .route(
            "/",
            get(companies::get_company)
                .put(companies::update_company)
                .delete(companies::delete_company),
        )
        .route(
            "/people",
            get(people::list_people).post(people::create_person),
        )
        .route(
            "/people/:person",
            get(people::get_person)
                .put(people::update_person)
                .delete(people::delete_person),
        )
        .route(
            "/people/:person/attributes",
            get(people::list_attributes).put(people::put_attributes),
        )
        .route("/people/:person/notes", post(notes::create_note))
        .route("/people/:person/timeline", get(notes::timeline))
        .route("/people/:person/mentions", get(notes::mentions))
        .route("/people/:person/ai/chat", post(ai::person_chat))
        .route(
            "/notes/:note",
            get(notes::get_note)
                .put(notes::update_note)
                .delete(notes::delete_note),
        )
        .route("/notes/:note/ai/extract", post(ai::extract))
        .route("/ai/chat", post(ai::chat))
        .route("/ai/usage", get(ai::usage_report))
        .route("/ai/usage/:usage/feedback", post(ai::feedback))
        .route_layer(middleware::from_extractor_with_state::<CompanyScope, _>(
            state.clone(),
        ));

    Router::new()
        .merge(public_routes)
        .merge(private_routes)
        .nest("/companies/:company", company_routes)
        .with_state(state)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// Mirrors the caller's origin unless an explicit comma-separated list is
/// configured. Entries that are not valid header values are skipped.
fn cors_layer(allowed: Option<&str>) -> CorsLayer {
    let origin = match allowed {
        Some(origins) => {
            let headers: Vec<HeaderValue> = origins
                .split(',')
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .filter_map(|value| match value.parse::<HeaderValue>() {
                    Ok(header) => Some(header),
                    Err(_) => {
                        warn!(origin = value, "ignoring invalid CORS origin");
                        None
                    }
                })
                .collect();
            AllowOrigin::list(headers)
        }
        None => AllowOrigin::mirror_request(),
    };

    CorsLayer::new()
        .allow_origin(origin)
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true)
}
