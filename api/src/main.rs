mod error;

use axum::{
    extract::{Path, Query, State},
    http::header,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use error::ApiError;
use ordbok_lib::catalog::{Catalog, DictionaryMeta, LangPair};
use ordbok_lib::util::{gunzip, is_gzip};
use ordbok_lib::{decode_with, Collation, Session, Source};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tracing_subscriber::EnvFilter;

const DEFAULT_LIMIT: usize = 20;
const MAX_LIMIT: usize = 100;

struct AppState {
    catalog: Catalog,
    tries_dir: PathBuf,
    sessions: HashMap<LangPair, Session>,
}

impl AppState {
    /// Decode every catalog dictionary found in `tries_dir`. Missing or
    /// unreadable files are logged and left out of `/lookup`.
    fn load(catalog: Catalog, tries_dir: PathBuf, collation: Collation) -> Self {
        let mut sessions = HashMap::new();
        for meta in catalog.iter() {
            let path = tries_dir.join(meta.trie_file());
            let bytes = match std::fs::read(&path) {
                Ok(bytes) => bytes,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Trie file not available");
                    continue;
                }
            };
            let payload = if is_gzip(&bytes) {
                match gunzip(&bytes) {
                    Ok(payload) => payload,
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "Trie file is not valid gzip");
                        continue;
                    }
                }
            } else {
                bytes
            };
            match decode_with(&payload, collation) {
                Ok(trie) => {
                    tracing::info!(pair = %meta.pair(), headwords = trie.len(), "Loaded dictionary");
                    sessions.insert(meta.pair(), Session::new(meta.clone(), trie, Source::File));
                }
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "Trie file does not decode"),
            }
        }
        Self {
            catalog,
            tries_dir,
            sessions,
        }
    }
}

// === Request/Response types ===

#[derive(Deserialize)]
struct ListQuery {
    from: Option<String>,
    to: Option<String>,
}

#[derive(Deserialize)]
struct LookupQuery {
    #[serde(default)]
    q: String,
    limit: Option<usize>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    dictionaries: usize,
    loaded: usize,
}

#[derive(Serialize)]
struct LookupHit {
    word: String,
    pos: String,
    translations: Vec<String>,
}

#[derive(Serialize)]
struct LookupResponse {
    pair: String,
    query: String,
    hits: Vec<LookupHit>,
}

// === Handlers ===

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        dictionaries: state.catalog.len(),
        loaded: state.sessions.len(),
    })
}

async fn list_dictionaries(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListQuery>,
) -> Json<Vec<DictionaryMeta>> {
    let metas = state.catalog.list(params.from.as_deref(), params.to.as_deref());
    Json(metas.into_iter().cloned().collect())
}

async fn meta_info(
    State(state): State<Arc<AppState>>,
    Path(pair): Path<String>,
) -> Result<Json<DictionaryMeta>, ApiError> {
    let pair: LangPair = pair.parse()?;
    Ok(Json(state.catalog.get(&pair)?.clone()))
}

async fn trie_file(
    State(state): State<Arc<AppState>>,
    Path(file): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    // only files named by the catalog are served
    if !state.catalog.iter().any(|meta| meta.trie_file() == file) {
        return Err(ApiError::NoFile(file));
    }
    let bytes = match tokio::fs::read(state.tries_dir.join(&file)).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(ApiError::NoFile(file)),
        Err(e) => return Err(e.into()),
    };
    let content_type = if is_gzip(&bytes) {
        "application/gzip"
    } else {
        "application/octet-stream"
    };
    Ok(([(header::CONTENT_TYPE, content_type)], bytes))
}

async fn lookup(
    State(state): State<Arc<AppState>>,
    Path(pair): Path<String>,
    Query(params): Query<LookupQuery>,
) -> Result<Json<LookupResponse>, ApiError> {
    let pair: LangPair = pair.parse()?;
    let session = match state.sessions.get(&pair) {
        Some(session) => session,
        None => {
            state.catalog.get(&pair)?;
            return Err(ApiError::NotLoaded(pair.to_string()));
        }
    };
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT);
    let hits = session
        .lookup(&params.q, limit)?
        .into_iter()
        .map(|hit| LookupHit {
            word: hit.word,
            pos: hit.pos.to_string(),
            translations: hit.translations.to_vec(),
        })
        .collect();
    Ok(Json(LookupResponse {
        pair: pair.to_string(),
        query: params.q.trim().to_string(),
        hits,
    }))
}

fn app(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/dictionaries", get(list_dictionaries))
        .route("/meta-info/:pair", get(meta_info))
        .route("/tries/:file", get(trie_file))
        .route("/lookup/:pair", get(lookup))
        .layer(RequestBodyLimitLayer::new(16 * 1024))
        .layer(cors)
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let addr = std::env::var("ORDBOK_API_ADDR").unwrap_or_else(|_| "127.0.0.1:3000".to_string());
    let tries_dir = PathBuf::from(std::env::var("ORDBOK_TRIES_DIR").unwrap_or_else(|_| "tries".to_string()));
    let catalog_path = std::env::var("ORDBOK_CATALOG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| tries_dir.join("dict_metas.json"));
    let collation = match std::env::var("ORDBOK_COLLATION") {
        Ok(name) => name.parse().map_err(anyhow::Error::msg)?,
        Err(_) => Collation::default(),
    };

    let catalog = Catalog::load(&catalog_path)
        .map_err(|e| anyhow::anyhow!("Failed to load catalog {}: {}", catalog_path.display(), e))?;
    let state = tokio::task::spawn_blocking(move || AppState::load(catalog, tries_dir, collation)).await?;
    let state = Arc::new(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on http://{}", addr);
    axum::serve(listener, app(state)).await?;

    Ok(())
}
