use axum::extract::DefaultBodyLimit;
use axum::routing::{delete, get, put};
use axum::Router;

use crate::serve::state::AppState;
use crate::serve::{images, tags};

const MAX_REQUEST_BODY_BYTES: usize = 2 * 1024 * 1024 * 1024;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route(
            "/v1/images/{image_id}/json",
            get(images::get_image_json).put(images::put_image_json),
        )
        .route(
            "/v1/images/{image_id}/layer",
            get(images::get_image_layer).put(images::put_image_layer),
        )
        .route(
            "/v1/images/{image_id}/ancestry",
            get(images::get_image_ancestry),
        )
        .route(
            "/v1/images/{image_id}/checksum",
            put(images::put_image_checksum),
        )
        .route("/v1/images/{image_id}/files", get(images::get_image_files))
        .route("/v1/images/{image_id}/diff", get(images::get_image_diff))
        .route(
            "/v1/repositories/{namespace}/{repository}/tags",
            get(tags::get_repo_tags).delete(tags::delete_repo_tags),
        )
        .route(
            "/v1/repositories/{namespace}/{repository}/tags/{tag}",
            get(tags::get_repo_tag)
                .put(tags::put_repo_tag)
                .delete(tags::delete_repo_tag),
        )
        .route(
            "/v1/repositories/{namespace}/{repository}/json",
            get(tags::get_repo_json),
        )
        .route(
            "/v1/repositories/{namespace}/{repository}",
            delete(tags::delete_repo),
        )
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_BYTES))
        .with_state(state)
}
