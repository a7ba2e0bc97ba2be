//! HTTP server for the smsbatch console API.
//!
//! Provides REST endpoints for recipient file upload, template preview,
//! length measurement, and tag normalization. Message dispatch is owned
//! by the delivery system; this server stops at composed batches.
//!
//! # API Endpoints
//!
//! | Method | Path              | Description                          |
//! |--------|-------------------|--------------------------------------|
//! | GET    | `/health`         | Health check                         |
//! | POST   | `/api/batch`      | Upload recipient file, compose batch |
//! | POST   | `/api/preview`    | Render a template preview            |
//! | POST   | `/api/measure`    | Count characters and segments        |
//! | POST   | `/api/normalize`  | Renumber URL tags                    |
//! | GET    | `/api/logs`       | SSE stream for real-time logs        |

use axum::{
    extract::{DefaultBodyLimit, Multipart},
    http::{header, Method, StatusCode},
    response::{sse::Event, IntoResponse, Json, Response, Sse},
    routing::{get, post},
    Router,
};
use futures::stream::Stream;
use serde_json::{json, Value};
use std::{convert::Infallible, net::SocketAddr, path::Path, time::Duration};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt as _;
use tower_http::cors::CorsLayer;

use super::logs::{log_error, log_info_from, log_warning, LOG_BROADCASTER};
use super::types::{
    error_response, BatchResponse, FileMetadata, MeasureRequest, MeasureResponse,
    NormalizeRequest, NormalizeResponse, PreviewRequest, PreviewResponse,
};
use crate::batch::{BatchPipeline, CancelToken, CountSink};
use crate::error::{BatchError, RegistryError, ServerError, ServerResult};
use crate::mapper::is_truthy;
use crate::models::{BatchOptions, SendOptions};
use crate::parser::{parse_bytes, FileEncoding, FileKind};
use crate::registry::{load_tag_defaults, permissions_for, StaticPermissions, TemplateRegistry};
use crate::segment::{self, SmsLengthOptions};
use crate::template::{measure_text, preview_render, tags, TagDefaultTable, Template};

/// The default 2 MB body limit is far below a full recipient file.
const MAX_UPLOAD_BYTES: usize = 256 * 1024 * 1024;

/// Start the HTTP server
pub async fn start_server(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT])
        .expose_headers([header::CONTENT_TYPE]);

    let app = Router::new()
        .route("/", get(health))
        .route("/health", get(health))
        .route("/api/batch", post(submit_batch))
        .route("/api/preview", post(preview))
        .route("/api/measure", post(measure))
        .route("/api/normalize", post(normalize))
        .route("/api/logs", get(sse_logs))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(cors);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    println!("🚀 smsbatch server running on http://localhost:{}", port);
    println!("   POST /api/batch     - Upload recipient file");
    println!("   POST /api/preview   - Render a template preview");
    println!("   POST /api/measure   - Count characters and segments");
    println!("   POST /api/normalize - Renumber URL tags");
    println!("   GET  /api/logs      - SSE log stream");
    println!("   GET  /health        - Health check");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Liveness probe; also lists the routes for anyone poking around.
async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "smsbatch",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "batch": "POST /api/batch",
            "preview": "POST /api/preview",
            "measure": "POST /api/measure",
            "normalize": "POST /api/normalize",
            "logs": "GET /api/logs (SSE)"
        }
    }))
}

/// Streams pipeline log lines to the console UI over SSE.
async fn sse_logs() -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = LOG_BROADCASTER.subscribe();

    let stream = BroadcastStream::new(rx).filter_map(|result| match result {
        Ok(entry) => {
            let json = serde_json::to_string(&entry).ok()?;
            Some(Ok(Event::default().data(json)))
        }
        Err(_) => None,
    });

    Sse::new(stream).keep_alive(
        axum::response::sse::KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}

/// Upload endpoint: parse the file, compose the batch, return the report.
///
/// Multipart fields: `file` (required), `templateId` (required),
/// `encoding`, `kind`, `enableLongSms`, `senderNumber`, `subjectId`,
/// `url1`..`url4` (submit-level URL overrides).
async fn submit_batch(mut multipart: Multipart) -> ServerResult<Json<BatchResponse>> {
    let mut file_data: Option<Vec<u8>> = None;
    let mut file_name: Option<String> = None;
    let mut template_id: Option<String> = None;
    let mut encoding = FileEncoding::Auto;
    let mut kind: Option<FileKind> = None;
    let mut send = SendOptions::default();
    let mut subject_id = String::new();

    while let Some(field) = multipart.next_field().await.map_err(bad_request)? {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "file" => {
                file_name = field.file_name().map(|s| s.to_string());
                file_data = Some(field.bytes().await.map_err(bad_request)?.to_vec());
            }
            "templateId" => template_id = Some(field.text().await.map_err(bad_request)?),
            "encoding" => {
                encoding = field
                    .text()
                    .await
                    .map_err(bad_request)?
                    .parse()
                    .map_err(BatchError::from)?;
            }
            "kind" => {
                kind = Some(
                    field
                        .text()
                        .await
                        .map_err(bad_request)?
                        .parse()
                        .map_err(BatchError::from)?,
                );
            }
            "enableLongSms" => {
                send.enable_long_sms = is_truthy(&field.text().await.map_err(bad_request)?);
            }
            "senderNumber" => send.sender_number = field.text().await.map_err(bad_request)?,
            "subjectId" => subject_id = field.text().await.map_err(bad_request)?,
            other => {
                if let Some(digit) = other.strip_prefix("url") {
                    if let Ok(slot) = digit.parse::<u8>() {
                        send.url_overrides.set(slot, field.text().await.map_err(bad_request)?);
                    }
                }
            }
        }
    }

    let bytes = file_data.ok_or_else(|| ServerError::BadRequest("No file provided".into()))?;
    let template_id =
        template_id.ok_or_else(|| ServerError::BadRequest("No template selected".into()))?;

    println!("\n{}", "=".repeat(70));
    println!(
        "📨 NEW BATCH: {} ({} bytes)",
        file_name.as_deref().unwrap_or("unknown"),
        bytes.len()
    );
    println!("{}\n", "=".repeat(70));

    let kind = kind.unwrap_or_else(|| {
        file_name
            .as_deref()
            .map(|name| FileKind::from_path(Path::new(name)))
            .unwrap_or(FileKind::Csv)
    });

    let mut registry = TemplateRegistry::new();
    let template = registry.get_template(&template_id)?;
    let defaults = tag_defaults();
    let permissions = permissions_for(&StaticPermissions::from_env(), &subject_id);

    let parsed = parse_bytes(&bytes, encoding, kind).map_err(BatchError::from)?;
    log_info_from(
        "parse",
        format!("Decoded {} as {}: {} data rows", kind.label(), parsed.encoding, parsed.row_count),
    );
    let file = FileMetadata::from(&parsed);

    let pipeline = BatchPipeline {
        template: &template,
        defaults: &defaults,
        send,
        permissions,
        options: BatchOptions::from_env(),
    };

    let mut sink = CountSink::default();
    let report = pipeline.run(parsed, &mut sink, &CancelToken::new()).await?;

    registry.touch(&template_id);

    let response = BatchResponse::new(report, file);
    println!("\n{}", "=".repeat(70));
    println!("📊 BATCH RESULT: {}", response.status);
    println!("   Accepted: {} / {}", response.report.accepted_rows, response.report.total_rows);
    println!("{}\n", "=".repeat(70));

    Ok(Json(response))
}

/// Preview endpoint: render a template against sample values.
async fn preview(Json(request): Json<PreviewRequest>) -> ServerResult<Json<PreviewResponse>> {
    let template = resolve_template(request.template_id.as_deref(), request.body.as_deref())?;
    let defaults = tag_defaults();
    let row = request.sample.to_row();
    let rendered = preview_render(&template, &row, &defaults)?;
    let options = SmsLengthOptions::for_sender(request.enable_long_sms, &request.sender_number);
    let measured = segment::measure(&rendered.text, &options);
    Ok(Json(PreviewResponse::new(rendered, measured)))
}

/// Measure endpoint: length accounting for editor text.
async fn measure(Json(request): Json<MeasureRequest>) -> Json<MeasureResponse> {
    let measured = measure_text(&request.text, &request.send_options().length_options());
    Json(measured.into())
}

/// Normalize endpoint: renumber URL tags into first-use order.
async fn normalize(Json(request): Json<NormalizeRequest>) -> ServerResult<Json<NormalizeResponse>> {
    tags::validate_body(&request.body)?;
    let body = tags::normalize_url_tags(&request.body);
    let changed = body != request.body;
    let url_count = tags::url_indices(&body).len();
    let next_url_index = tags::next_url_index(&body).ok();
    Ok(Json(NormalizeResponse { body, changed, url_count, next_url_index }))
}

/// Template from an inline body, or from the registry by id.
fn resolve_template(template_id: Option<&str>, body: Option<&str>) -> ServerResult<Template> {
    if let Some(body) = body {
        return Ok(Template::new("", "", body)?);
    }
    let id = template_id
        .ok_or_else(|| ServerError::BadRequest("templateId or body required".into()))?;
    let registry = TemplateRegistry::new();
    Ok(registry.get_template(id)?)
}

/// Tag defaults from `SMSBATCH_TAG_DEFAULTS`, or the built-in table.
fn tag_defaults() -> TagDefaultTable {
    let Ok(path) = std::env::var("SMSBATCH_TAG_DEFAULTS") else {
        return TagDefaultTable::default();
    };
    match load_tag_defaults(Path::new(&path)) {
        Ok(table) => table,
        Err(err) => {
            log_warning(format!("Could not load tag defaults from {}: {}", path, err));
            TagDefaultTable::default()
        }
    }
}

fn bad_request(err: impl std::fmt::Display) -> ServerError {
    ServerError::BadRequest(err.to_string())
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = match &self {
            ServerError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::Template(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ServerError::Registry(RegistryError::NotFound(_)) => StatusCode::NOT_FOUND,
            ServerError::Batch(BatchError::TooManyRows { .. }) => StatusCode::PAYLOAD_TOO_LARGE,
            ServerError::Batch(BatchError::Parse(_) | BatchError::Schema(_)) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        log_error(self.to_string());
        (status, Json(error_response(&self.to_string()))).into_response()
    }
}
