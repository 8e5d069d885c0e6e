use axum::body::{Body, Bytes};
use axum::extract::{Path, State};
use axum::http::header::{HeaderMap, USER_AGENT};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{json, Map, Value};

use crate::serve::error::ApiError;
use crate::serve::state::AppState;
use crate::storage::paths;

lazy_static! {
    /// Matches the repeated `key/value` tokens docker clients send, e.g.
    /// `docker/1.2 go/1.3 arch/amd64 kernel/3.10 os/linux`.
    static ref USER_AGENT_TOKENS: Regex =
        Regex::new(r"([a-zA-Z0-9_-]+)/([^\s/]+)").expect("user agent pattern");
}

fn default_repo_json() -> Value {
    json!({
        "last_update": null,
        "docker_version": null,
        "docker_go_version": null,
        "arch": "amd64",
        "os": "linux",
        "kernel": null,
    })
}

fn json_true() -> Response {
    (StatusCode::OK, axum::Json(true)).into_response()
}

pub async fn get_repo_tags(
    State(state): State<AppState>,
    Path((namespace, repository)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    log::debug!("get tags: namespace={namespace}; repository={repository}");
    let names = state
        .backend
        .list(&paths::repo_tag(&namespace, &repository, ""))
        .await
        .map_err(|_| ApiError::not_found("Repository not found"))?;

    let mut data = Map::new();
    for name in names {
        let base = paths::base_name(&name);
        let Some(tag_name) = base.strip_prefix(paths::TAG_PREFIX) else {
            continue;
        };
        let content = state
            .backend
            .get(&name)
            .await
            .map_err(|err| ApiError::internal(format!("Internal Error: {err}")))?;
        data.insert(
            tag_name.to_string(),
            Value::String(String::from_utf8_lossy(&content).into_owned()),
        );
    }
    Ok(axum::Json(Value::Object(data)).into_response())
}

pub async fn delete_repo_tags(
    State(state): State<AppState>,
    Path((namespace, repository)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    log::debug!("delete tags: namespace={namespace}; repository={repository}");
    state
        .backend
        .remove_all(&paths::repo_tag(&namespace, &repository, ""))
        .await
        .map_err(|_| ApiError::not_found("Repository not found"))?;
    Ok(json_true())
}

pub async fn get_repo_tag(
    State(state): State<AppState>,
    Path((namespace, repository, tag)): Path<(String, String, String)>,
) -> Result<Response, ApiError> {
    log::debug!("get tag: namespace={namespace}; repository={repository}; tag={tag}");
    let content = state
        .backend
        .get(&paths::repo_tag(&namespace, &repository, &tag))
        .await
        .map_err(|_| ApiError::not_found("Tag not found"))?;
    Ok((StatusCode::OK, Body::from(content)).into_response())
}

pub async fn put_repo_tag(
    State(state): State<AppState>,
    Path((namespace, repository, tag)): Path<(String, String, String)>,
    request_headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    log::debug!("put tag: namespace={namespace}; repository={repository}; tag={tag}");
    if body.is_empty() {
        return Err(ApiError::bad_request("Invalid data"));
    }
    let image_id = String::from_utf8_lossy(&body).into_owned();
    if !state.backend.exists(&paths::image_json(&image_id)).await {
        return Err(ApiError::not_found("Image not found"));
    }
    state
        .backend
        .put(&paths::repo_tag(&namespace, &repository, &tag), &body)
        .await
        .map_err(|err| ApiError::internal(format!("Internal Error: {err}")))?;

    if tag == "latest" {
        let user_agent = request_headers
            .get(USER_AGENT)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("");
        let metadata = create_repo_json(user_agent);
        let json_data = serde_json::to_vec(&metadata)
            .map_err(|err| ApiError::internal(format!("Internal Error: {err}")))?;
        // Metadata is advisory; a failed write does not fail the tag.
        if let Err(err) = state
            .backend
            .put(&paths::repo_json(&namespace, &repository), &json_data)
            .await
        {
            log::debug!("repository metadata write failed for {namespace}/{repository}: {err}");
        }
    }
    Ok(json_true())
}

pub async fn delete_repo_tag(
    State(state): State<AppState>,
    Path((namespace, repository, tag)): Path<(String, String, String)>,
) -> Result<Response, ApiError> {
    log::debug!("delete tag: namespace={namespace}; repository={repository}; tag={tag}");
    state
        .backend
        .remove(&paths::repo_tag(&namespace, &repository, &tag))
        .await
        .map_err(|_| ApiError::not_found("Tag not found"))?;
    Ok(json_true())
}

pub async fn get_repo_json(
    State(state): State<AppState>,
    Path((namespace, repository)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    log::debug!("get repo json: namespace={namespace}; repository={repository}");
    let content = match state
        .backend
        .get(&paths::repo_json(&namespace, &repository))
        .await
    {
        Ok(content) => content,
        Err(_) => return Ok(axum::Json(default_repo_json()).into_response()),
    };
    match serde_json::from_slice::<Map<String, Value>>(&content) {
        Ok(data) => Ok(axum::Json(Value::Object(data)).into_response()),
        Err(_) => Ok(axum::Json(default_repo_json()).into_response()),
    }
}

pub async fn delete_repo(
    Path((namespace, repository)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    log::debug!("delete repo: namespace={namespace}; repository={repository}");
    Ok((StatusCode::NOT_IMPLEMENTED, axum::Json("Not Implemented")).into_response())
}

/// Repository metadata derived from the tagging client's User-Agent.
fn create_repo_json(user_agent: &str) -> Value {
    let mut props = Map::new();
    props.insert("last_update".to_string(), json!(Utc::now().timestamp()));

    let mut tokens: std::collections::HashMap<String, String> = std::collections::HashMap::new();
    for capture in USER_AGENT_TOKENS.captures_iter(user_agent) {
        tokens.insert(capture[1].to_string(), capture[2].to_string());
    }
    let docker_version = tokens.get("docker").or_else(|| tokens.get("docker_version"));
    if let Some(value) = docker_version {
        props.insert("docker_version".to_string(), json!(value));
    }
    let go_version = tokens.get("go").or_else(|| tokens.get("docker_go_version"));
    if let Some(value) = go_version {
        props.insert("docker_go_version".to_string(), json!(value));
    }
    for key in ["arch", "kernel", "os"] {
        if let Some(value) = tokens.get(key) {
            props.insert(key.to_string(), json!(value.to_lowercase()));
        }
    }
    Value::Object(props)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_repo_json_parses_docker_user_agent() {
        let metadata =
            create_repo_json("docker/1.2 go/1.3 arch/AMD64 os/Linux kernel/3.10");
        assert_eq!(metadata["docker_version"], "1.2");
        assert_eq!(metadata["docker_go_version"], "1.3");
        assert_eq!(metadata["arch"], "amd64");
        assert_eq!(metadata["os"], "linux");
        assert_eq!(metadata["kernel"], "3.10");
        let now = Utc::now().timestamp();
        let last_update = metadata["last_update"].as_i64().unwrap();
        assert!(now - last_update < 5);
    }

    #[test]
    fn test_create_repo_json_ignores_unknown_tokens() {
        let metadata = create_repo_json("docker/0.6.5 git-commit/abcdef frobnicator/9");
        assert_eq!(metadata["docker_version"], "0.6.5");
        assert!(metadata.get("git-commit").is_none());
        assert!(metadata.get("frobnicator").is_none());
    }

    #[test]
    fn test_create_repo_json_empty_user_agent() {
        let metadata = create_repo_json("");
        assert!(metadata.get("docker_version").is_none());
        assert!(metadata["last_update"].is_i64());
    }

    #[test]
    fn test_default_repo_json_shape() {
        let value = default_repo_json();
        assert_eq!(value["arch"], "amd64");
        assert_eq!(value["os"], "linux");
        assert!(value["last_update"].is_null());
        assert!(value["docker_version"].is_null());
        assert!(value["docker_go_version"].is_null());
        assert!(value["kernel"].is_null());
    }
}
