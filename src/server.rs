//! HTTP surface.
//!
//! | Endpoint | Method | Purpose |
//! |----------|--------|---------|
//! | `/` or `/<N>` | any | Image of page 1 / page N |
//! | `/RELOAD` (any case) | POST | Render every page now |
//!
//! Devices may report battery telemetry on image requests:
//! `GET /2?batteryLevel=55&isCharging=Yes`.
//!
//! ```rust,ignore
//! let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port)).await?;
//! axum::serve(listener, hass_eink::server::router(service)).await?;
//! ```

use std::sync::Arc;
use std::time::SystemTime;

use axum::extract::State;
use axum::http::{header, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Router;
use chrono::{DateTime, Utc};

use crate::battery::BatteryReport;
use crate::error::Error;
use crate::service::Service;

/// Build the router. Every request goes through [`dispatch`].
pub fn router(service: Arc<Service>) -> Router {
    Router::new().fallback(dispatch).with_state(service)
}

/// Format a timestamp as an HTTP date (`Sun, 06 Nov 1994 08:49:37 GMT`).
pub fn http_date(time: SystemTime) -> String {
    DateTime::<Utc>::from(time)
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string()
}

/// Map a request path to a page index.
///
/// `/` is page 1, `/N` is page N. Anything that is not a page number in
/// `1..=page_count` is rejected.
pub fn page_index(path: &str, page_count: usize) -> Option<usize> {
    if path == "/" {
        return (page_count > 0).then_some(0);
    }

    let digits = path.strip_prefix('/')?;
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let number: usize = digits.parse().ok()?;
    (1..=page_count).contains(&number).then(|| number - 1)
}

/// Route a request by its method and path.
pub async fn dispatch(
    State(service): State<Arc<Service>>,
    method: Method,
    uri: Uri,
) -> Response {
    let path = uri.path();

    if method == Method::POST && path.eq_ignore_ascii_case("/reload") {
        tracing::info!("Received reload request");
        service.render_batch().await;
        return (StatusCode::OK, "Reloaded").into_response();
    }

    let Some(index) = page_index(path, service.pages().len()) else {
        tracing::info!("Invalid request: {}", uri);
        return (StatusCode::BAD_REQUEST, "Invalid request").into_response();
    };

    tracing::info!("Image {} was accessed", index + 1);

    // Record first so an eager render reports the fresh battery state
    let report = BatteryReport::from_query_string(uri.query().unwrap_or_default());
    service.battery().record(index, &report);

    serve_page(&service, index).await
}

async fn serve_page(service: &Service, index: usize) -> Response {
    let Some(page) = service.page(index) else {
        return (StatusCode::BAD_REQUEST, "Invalid request").into_response();
    };

    let (data, modified) = if service.is_eager() {
        tracing::info!("Eager render requested. Rerendering...");
        match service.render_and_convert(index).await {
            Some(data) => (data, SystemTime::now()),
            None => {
                return (StatusCode::INTERNAL_SERVER_ERROR, "Failed to render image")
                    .into_response()
            }
        }
    } else {
        match service.store().read(page).await {
            Ok(stored) => (stored.data, stored.modified),
            Err(Error::NotFound(path)) => {
                tracing::info!("No image rendered yet at {}", path.display());
                return (StatusCode::NOT_FOUND, "Image not found").into_response();
            }
            Err(e) => {
                tracing::error!("{}", e);
                return (StatusCode::NOT_FOUND, "Image not found").into_response();
            }
        }
    };

    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, page.image_format.content_type().to_string()),
            (header::CONTENT_LENGTH, data.len().to_string()),
            (header::LAST_MODIFIED, http_date(modified)),
        ],
        data,
    )
        .into_response()
}
