use std::{collections::BTreeMap, sync::Arc, time::Duration};

use axum::{
    extract::{Path, Request, State},
    http::{HeaderMap, Method, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Redirect, Response},
    routing::get,
    Form, Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::{net::TcpListener, sync::RwLock};
use tracing::debug;
use uuid::Uuid;

/// One request observed by the server.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Hit {
    pub id: Uuid,
    pub method: String,
    pub path: String,
}

/// What `/echo` saw: method, lower-cased headers and form fields.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Echo {
    pub method: String,
    pub headers: BTreeMap<String, String>,
    pub form: BTreeMap<String, String>,
}

pub type Hits = Arc<RwLock<Vec<Hit>>>;

/// Upper bound on `/delay/{ms}` so a typo cannot hang a test run.
pub const MAX_DELAY_MS: u64 = 10_000;

pub fn app() -> Router {
    let hits: Hits = Arc::new(RwLock::new(Vec::new()));
    Router::new()
        .route("/delay/{ms}", get(delay))
        .route("/status/{code}", get(status))
        .route("/echo", get(echo_get).post(echo_post))
        .route("/redirect/{n}", get(redirect))
        .route("/hits", get(list_hits).delete(clear_hits))
        .layer(middleware::from_fn_with_state(hits.clone(), record_hit))
        .with_state(hits)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    axum::serve(listener, app()).await
}

async fn record_hit(State(hits): State<Hits>, request: Request, next: Next) -> Response {
    let path = request.uri().path().to_string();
    if path != "/hits" {
        let hit = Hit {
            id: Uuid::new_v4(),
            method: request.method().to_string(),
            path,
        };
        debug!(id = %hit.id, method = %hit.method, path = %hit.path, "hit");
        hits.write().await.push(hit);
    }
    next.run(request).await
}

async fn delay(Path(ms): Path<u64>) -> Result<String, StatusCode> {
    if ms > MAX_DELAY_MS {
        return Err(StatusCode::BAD_REQUEST);
    }
    tokio::time::sleep(Duration::from_millis(ms)).await;
    Ok(format!("delayed {ms}"))
}

async fn status(Path(code): Path<u16>) -> Response {
    match StatusCode::from_u16(code) {
        Ok(code) => (code, format!("status {}", code.as_u16())).into_response(),
        Err(_) => StatusCode::BAD_REQUEST.into_response(),
    }
}

async fn echo_get(method: Method, headers: HeaderMap) -> Json<Echo> {
    Json(echo(method, &headers, BTreeMap::new()))
}

async fn echo_post(
    method: Method,
    headers: HeaderMap,
    Form(form): Form<BTreeMap<String, String>>,
) -> Json<Echo> {
    Json(echo(method, &headers, form))
}

fn echo(method: Method, headers: &HeaderMap, form: BTreeMap<String, String>) -> Echo {
    let headers = headers
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })
        .collect();
    Echo {
        method: method.to_string(),
        headers,
        form,
    }
}

async fn redirect(Path(n): Path<u32>) -> Redirect {
    if n == 0 {
        Redirect::to("/echo")
    } else {
        Redirect::to(&format!("/redirect/{}", n - 1))
    }
}

async fn list_hits(State(hits): State<Hits>) -> Json<Vec<Hit>> {
    Json(hits.read().await.clone())
}

async fn clear_hits(State(hits): State<Hits>) -> StatusCode {
    hits.write().await.clear();
    StatusCode::NO_CONTENT
}
