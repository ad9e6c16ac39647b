use anyhow::Result;
use axum::extract::Request;
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE};
use axum::http::HeaderValue;
use axum::middleware::{from_fn, Next};
use axum::response::{Html, Response};
use axum::routing::{get, get_service};
use axum::Router;
use std::path::PathBuf;
use tower_http::services::{ServeDir, ServeFile};

const PLACEHOLDER_INDEX: &str = r#"<!doctype html>
<html lang="en">
  <head>
    <meta charset="utf-8" />
    <meta name="viewport" content="width=device-width, initial-scale=1" />
    <title>TSDB Console</title>
  </head>
  <body style="font-family: system-ui; padding: 24px">
    <h1>TSDB Console</h1>
    <p>No UI build is configured. Start with <code>--static-root</code> or set <code>TSDB_STATIC_ROOT</code>.</p>
  </body>
</html>
"#;

async fn apply_cache_headers(req: Request, next: Next) -> Response {
    let path = req.uri().path().to_owned();
    let mut response = next.run(req).await;
    if response.headers().contains_key(CACHE_CONTROL) {
        return response;
    }

    let is_html = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("text/html"));

    let cache_value = if path.starts_with("/_next/static/") {
        // Fingerprinted build output.
        "public, max-age=31536000, immutable"
    } else if is_html {
        "no-store"
    } else {
        "public, max-age=86400"
    };
    response
        .headers_mut()
        .insert(CACHE_CONTROL, HeaderValue::from_static(cache_value));
    response
}

/// Single-page UI from `static_root`, or a placeholder page when none is configured.
pub fn service(static_root: Option<PathBuf>) -> Result<Router> {
    let Some(root) = static_root else {
        async fn placeholder() -> Html<&'static str> {
            Html(PLACEHOLDER_INDEX)
        }
        return Ok(Router::new().fallback(get(placeholder)));
    };

    if !root.is_dir() {
        anyhow::bail!("static root {} is not a directory", root.display());
    }
    let index = root.join("index.html");
    let dir = ServeDir::new(root)
        .append_index_html_on_directories(true)
        .fallback(ServeFile::new(index));
    Ok(Router::new()
        .fallback_service(get_service(dir))
        .layer(from_fn(apply_cache_headers)))
}
