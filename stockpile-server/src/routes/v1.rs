use axum::Router;
use axum::routing::{get, post};

use crate::handlers::{files, server, stats, upload};
use crate::middleware;
use crate::state::AppState;

/// The original file-manager subset. v2 is a strict superset; these routes
/// stay for older tooling.
pub fn router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/", get(server::server_info))
        .route("/stats", get(stats::overview))
        .route("/activity", get(stats::activity))
        .route("/files", get(files::list_files).post(files::create_entry))
        .route("/files/search", get(files::search_files))
        .route(
            "/file/{*path}",
            get(files::get_file)
                .put(files::move_file)
                .delete(files::delete_file),
        )
        .route("/upload", post(upload::upload))
        .route_layer(axum::middleware::from_fn_with_state(
            state,
            middleware::api_auth,
        ))
}
