use axum::http::header::{
    HeaderMap, HeaderValue, CACHE_CONTROL, EXPIRES, IF_MODIFIED_SINCE, LAST_MODIFIED,
};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::Utc;

/// Blobs are immutable under their keys, so reads carry a fixed epoch
/// validator and a one-year freshness lifetime.
const EPOCH_HTTP_DATE: &str = "Thu, 01 Jan 1970 00:00:00 GMT";
const ONE_YEAR_SECONDS: i64 = 365 * 24 * 60 * 60;

pub fn cache_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        CACHE_CONTROL,
        HeaderValue::from_static("public, max-age=31536000"),
    );
    let expires = (Utc::now() + chrono::Duration::seconds(ONE_YEAR_SECONDS))
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string();
    headers.insert(
        EXPIRES,
        HeaderValue::from_str(&expires).unwrap_or(HeaderValue::from_static(EPOCH_HTTP_DATE)),
    );
    headers.insert(LAST_MODIFIED, HeaderValue::from_static(EPOCH_HTTP_DATE));
    headers
}

/// Any If-Modified-Since at all short-circuits to 304: no validator is ever
/// derived from content.
pub fn not_modified(request_headers: &HeaderMap) -> Option<Response> {
    if request_headers.contains_key(IF_MODIFIED_SINCE) {
        return Some((StatusCode::NOT_MODIFIED, cache_headers()).into_response());
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_headers_shape() {
        let headers = cache_headers();
        assert_eq!(
            headers.get(CACHE_CONTROL).unwrap(),
            "public, max-age=31536000"
        );
        assert_eq!(headers.get(LAST_MODIFIED).unwrap(), EPOCH_HTTP_DATE);
        let expires = headers.get(EXPIRES).unwrap().to_str().unwrap();
        assert!(expires.ends_with("GMT"));
        assert_ne!(expires, EPOCH_HTTP_DATE);
    }

    #[test]
    fn test_if_modified_since_short_circuits() {
        let mut request_headers = HeaderMap::new();
        assert!(not_modified(&request_headers).is_none());
        request_headers.insert(
            IF_MODIFIED_SINCE,
            HeaderValue::from_static("Wed, 01 Jan 2014 00:00:00 GMT"),
        );
        let response = not_modified(&request_headers).unwrap();
        assert_eq!(response.status(), StatusCode::NOT_MODIFIED);
    }
}
