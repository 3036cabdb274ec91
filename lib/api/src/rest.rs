use actix_cors::Cors;
use actix_multipart::{Field, Multipart, MultipartError};
use actix_web::http::{header, StatusCode};
use actix_web::{web, App, HttpRequest, HttpResponse, HttpServer, ResponseError};
use futures_util::TryStreamExt;
use revdata_core::{DatasetId, DedupConfig, Error, FieldMapping, NewDataset};
use revdata_ingest::IngestService;
use revdata_storage::{SpooledUpload, UploadSpool};
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, info};

/// Cap on a non-file form field
const MAX_TEXT_FIELD: usize = 1024 * 1024;

#[derive(Debug)]
pub enum ApiError {
    Core(Error),
    BadRequest(String),
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::Core(e) => write!(f, "{}", e),
            ApiError::BadRequest(msg) => f.write_str(msg),
        }
    }
}

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        ApiError::Core(e)
    }
}

impl From<MultipartError> for ApiError {
    fn from(e: MultipartError) -> Self {
        ApiError::BadRequest(format!("malformed multipart body: {}", e))
    }
}

/// HTTP status for a pipeline error
pub fn status_for(error: &Error) -> StatusCode {
    match error {
        Error::Parse { .. }
        | Error::UnsupportedFormat(_)
        | Error::Archive(_)
        | Error::NoDataFile
        | Error::InvalidConfig(_) => StatusCode::BAD_REQUEST,
        Error::DatasetNotFound(_) | Error::JobNotFound(_) => StatusCode::NOT_FOUND,
        Error::ImportInProgress(_) => StatusCode::CONFLICT,
        Error::UploadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
        e if e.is_embedding_error() => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Core(e) => status_for(e),
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(serde_json::json!({
            "error": self.to_string()
        }))
    }
}

type ApiResult = Result<HttpResponse, ApiError>;

pub struct RestApi;

impl RestApi {
    pub async fn start(service: IngestService, port: u16) -> std::io::Result<()> {
        info!(port, "Starting HTTP server");
        HttpServer::new(move || {
            let cors = Cors::default()
                .allow_any_origin()
                .allow_any_method()
                .allow_any_header()
                .max_age(3600);

            App::new()
                .wrap(cors)
                .app_data(web::Data::new(service.clone()))
                .configure(configure)
        })
        .bind(("0.0.0.0", port))?
        .run()
        .await
    }
}

/// Route table, shared with tests
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/datasets", web::get().to(list_datasets))
        .route("/datasets/upload", web::post().to(upload_dataset))
        .route("/datasets/detect-fields", web::post().to(detect_fields))
        .route("/datasets/{id}", web::get().to(get_dataset))
        .route("/datasets/{id}/append", web::post().to(append_dataset))
        .route("/jobs/{id}", web::get().to(get_job))
        .route("/queue", web::get().to(queue_stats));
}

#[derive(Default)]
struct UploadForm {
    upload: Option<SpooledUpload>,
    fields: HashMap<String, String>,
}

/// Reject a body whose declared length is already over the limit
fn check_content_length(req: &HttpRequest, spool: &UploadSpool) -> Result<(), ApiError> {
    let declared = req
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());
    if let Some(len) = declared {
        spool.check_declared_size(len)?;
    }
    Ok(())
}

async fn spool_field(spool: &UploadSpool, field: &mut Field, filename: &str) -> Result<SpooledUpload, ApiError> {
    let mut writer = spool.create(filename)?;
    while let Some(chunk) = field.try_next().await? {
        writer.write_chunk(&chunk)?;
    }
    Ok(writer.finish()?)
}

async fn read_text(field: &mut Field) -> Result<String, ApiError> {
    let mut buf = Vec::new();
    while let Some(chunk) = field.try_next().await? {
        if buf.len() + chunk.len() > MAX_TEXT_FIELD {
            return Err(ApiError::BadRequest("form field too large".into()));
        }
        buf.extend_from_slice(&chunk);
    }
    String::from_utf8(buf).map_err(|_| ApiError::BadRequest("form field is not UTF-8".into()))
}

async fn read_fields(spool: &UploadSpool, payload: &mut Multipart, form: &mut UploadForm) -> Result<(), ApiError> {
    while let Some(mut field) = payload.try_next().await? {
        let name = field.name().unwrap_or_default().to_string();
        let filename = field
            .content_disposition()
            .and_then(|cd| cd.get_filename())
            .map(str::to_string);
        match (name.as_str(), filename) {
            ("file", Some(filename)) => {
                if let Some(previous) = form.upload.take() {
                    spool.discard(&previous.path, None);
                }
                form.upload = Some(spool_field(spool, &mut field, &filename).await?);
            }
            _ => {
                let value = read_text(&mut field).await?;
                form.fields.insert(name, value);
            }
        }
    }
    Ok(())
}

/// Spool the `file` part and collect the text parts
async fn read_form(spool: &UploadSpool, mut payload: Multipart) -> Result<(SpooledUpload, HashMap<String, String>), ApiError> {
    let mut form = UploadForm::default();
    if let Err(e) = read_fields(spool, &mut payload, &mut form).await {
        if let Some(upload) = form.upload {
            spool.discard(&upload.path, None);
        }
        return Err(e);
    }
    let upload = form
        .upload
        .ok_or_else(|| ApiError::BadRequest("missing 'file' field".into()))?;
    debug!(file = %upload.filename, bytes = upload.size, "Upload received");
    Ok((upload, form.fields))
}

fn parse_json_field<T: serde::de::DeserializeOwned>(fields: &HashMap<String, String>, key: &str) -> Result<Option<T>, ApiError> {
    match fields.get(key).map(|s| s.trim()).filter(|s| !s.is_empty()) {
        Some(raw) => serde_json::from_str(raw)
            .map(Some)
            .map_err(|e| ApiError::BadRequest(format!("invalid '{}': {}", key, e))),
        None => Ok(None),
    }
}

fn new_dataset(fields: &HashMap<String, String>, upload: &SpooledUpload) -> Result<NewDataset, ApiError> {
    let name = fields
        .get("name")
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ApiError::BadRequest("missing 'name' field".into()))?;
    Ok(NewDataset {
        name,
        description: fields.get("description").cloned(),
        source_file: upload.filename.clone(),
        format: None,
        field_mapping: parse_json_field::<FieldMapping>(fields, "field_mapping")?,
        dedup_config: parse_json_field::<DedupConfig>(fields, "dedup_config")?.unwrap_or_default(),
    })
}

async fn upload_dataset(service: web::Data<IngestService>, req: HttpRequest, payload: Multipart) -> ApiResult {
    let spool = &service.storage().spool;
    check_content_length(&req, spool)?;
    let (upload, fields) = read_form(spool, payload).await?;
    let new = match new_dataset(&fields, &upload) {
        Ok(new) => new,
        Err(e) => {
            spool.discard(&upload.path, None);
            return Err(e);
        }
    };
    let (dataset, job) = service.submit_create(upload, new).await?;
    Ok(HttpResponse::Accepted().json(serde_json::json!({
        "dataset": dataset,
        "job": job,
    })))
}

async fn append_dataset(
    service: web::Data<IngestService>,
    req: HttpRequest,
    path: web::Path<DatasetId>,
    payload: Multipart,
) -> ApiResult {
    let dataset_id = path.into_inner();
    // 404 before reading the body
    service.dataset(dataset_id).await?;
    let spool = &service.storage().spool;
    check_content_length(&req, spool)?;
    let (upload, _) = read_form(spool, payload).await?;
    let job = service.submit_append(dataset_id, upload).await?;
    Ok(HttpResponse::Accepted().json(serde_json::json!({ "job": job })))
}

async fn detect_fields(service: web::Data<IngestService>, req: HttpRequest, payload: Multipart) -> ApiResult {
    let spool = &service.storage().spool;
    check_content_length(&req, spool)?;
    let (upload, _) = read_form(spool, payload).await?;
    let report = service.preview(upload).await?;
    Ok(HttpResponse::Ok().json(report))
}

async fn list_datasets(service: web::Data<IngestService>) -> ApiResult {
    Ok(HttpResponse::Ok().json(service.datasets().await?))
}

async fn get_dataset(service: web::Data<IngestService>, path: web::Path<DatasetId>) -> ApiResult {
    Ok(HttpResponse::Ok().json(service.dataset(path.into_inner()).await?))
}

async fn get_job(service: web::Data<IngestService>, path: web::Path<String>) -> ApiResult {
    Ok(HttpResponse::Ok().json(service.job(&path.into_inner()).await?))
}

async fn queue_stats(service: web::Data<IngestService>) -> ApiResult {
    Ok(HttpResponse::Ok().json(service.queue_stats()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{test, App};
    use revdata_ingest::{ImportSettings, Importer};
    use revdata_storage::StorageManager;
    use serde_json::Value;
    use std::time::Duration;

    const BOUNDARY: &str = "revdataboundary";

    fn service(dir: &std::path::Path, max_upload: u64) -> IngestService {
        let storage = StorageManager::in_memory(dir.join("uploads"), max_upload, 64).unwrap();
        IngestService::start(Importer::new(storage, ImportSettings::default()), 1, 8)
    }

    /// `(name, filename, body)` parts
    fn multipart(parts: &[(&str, Option<&str>, &str)]) -> Vec<u8> {
        let mut body = String::new();
        for (name, filename, content) in parts {
            body.push_str(&format!("--{}\r\n", BOUNDARY));
            match filename {
                Some(f) => body.push_str(&format!(
                    "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n\r\n",
                    name, f
                )),
                None => body.push_str(&format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", name)),
            }
            body.push_str(content);
            body.push_str("\r\n");
        }
        body.push_str(&format!("--{}--\r\n", BOUNDARY));
        body.into_bytes()
    }

    fn post(uri: &str, body: Vec<u8>) -> test::TestRequest {
        test::TestRequest::post()
            .uri(uri)
            .insert_header((
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", BOUNDARY),
            ))
            .set_payload(body)
    }

    #[actix_web::test]
    async fn test_upload_then_poll_job() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path(), 1 << 20);
        let app = test::init_service(App::new().app_data(web::Data::new(service.clone())).configure(configure)).await;

        let body = multipart(&[
            ("name", None, "faq"),
            ("file", Some("faq.jsonl"), "{\"question\":\"Q1\",\"answer\":\"A1\"}\n"),
        ]);
        let resp = test::call_service(&app, post("/datasets/upload", body).to_request()).await;
        assert_eq!(resp.status(), StatusCode::ACCEPTED);
        let created: Value = test::read_body_json(resp).await;
        assert_eq!(created["dataset"]["status"], "importing");
        let job_id = created["job"]["id"].as_str().unwrap().to_string();
        assert_eq!(created["job"]["sha256"].as_str().unwrap().len(), 64);

        let stats: Value =
            test::call_and_read_body_json(&app, test::TestRequest::get().uri("/queue").to_request()).await;
        assert_eq!(stats["submitted"], 1);

        let mut status = Value::Null;
        for _ in 0..200 {
            let req = test::TestRequest::get().uri(&format!("/jobs/{}", job_id)).to_request();
            let job: Value = test::call_and_read_body_json(&app, req).await;
            status = job["status"].clone();
            if status != "queued" && status != "running" {
                break;
            }
            actix_web::rt::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(status, "succeeded");

        let id = created["dataset"]["id"].as_u64().unwrap();
        let req = test::TestRequest::get().uri(&format!("/datasets/{}", id)).to_request();
        let dataset: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(dataset["status"], "ready");
        assert_eq!(dataset["item_count"], 1);
    }

    #[actix_web::test]
    async fn test_oversized_upload_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path(), 16);
        let app = test::init_service(App::new().app_data(web::Data::new(service.clone())).configure(configure)).await;

        let big = "{\"q\":\"x\"}\n".repeat(10);
        let body = multipart(&[("name", None, "big"), ("file", Some("big.jsonl"), &big)]);
        let resp = test::call_service(&app, post("/datasets/upload", body).to_request()).await;
        assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert!(service.datasets().await.unwrap().is_empty());
    }

    #[actix_web::test]
    async fn test_detect_fields_persists_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path(), 1 << 20);
        let app = test::init_service(App::new().app_data(web::Data::new(service.clone())).configure(configure)).await;

        let body = multipart(&[("file", Some("s.csv"), "prompt,completion\nhi,hello\n")]);
        let resp = test::call_service(&app, post("/datasets/detect-fields", body).to_request()).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let report: Value = test::read_body_json(resp).await;
        assert_eq!(report["suggested_mapping"]["question_field"], "prompt");
        assert_eq!(report["item_count_estimate"], 1);
        assert!(service.datasets().await.unwrap().is_empty());
    }

    #[actix_web::test]
    async fn test_error_statuses() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path(), 1 << 20);
        let app = test::init_service(App::new().app_data(web::Data::new(service.clone())).configure(configure)).await;

        let resp = test::call_service(&app, test::TestRequest::get().uri("/datasets/9").to_request()).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let body: Value = test::read_body_json(resp).await;
        assert!(body["error"].as_str().unwrap().contains('9'));

        let body = multipart(&[("file", Some("a.jsonl"), "{}\n")]);
        let resp = test::call_service(&app, post("/datasets/9/append", body).to_request()).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let body = multipart(&[("name", None, "n"), ("file", Some("notes.txt"), "hello")]);
        let resp = test::call_service(&app, post("/datasets/upload", body).to_request()).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let body = multipart(&[("file", Some("a.jsonl"), "{}\n")]);
        let resp = test::call_service(&app, post("/datasets/upload", body).to_request()).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[::core::prelude::v1::test]
    fn test_status_mapping() {
        assert_eq!(status_for(&Error::ImportInProgress(1)), StatusCode::CONFLICT);
        assert_eq!(status_for(&Error::NoDataFile), StatusCode::BAD_REQUEST);
        assert_eq!(status_for(&Error::EmbeddingApi("HTTP 500".into())), StatusCode::BAD_GATEWAY);
        assert_eq!(status_for(&Error::EmbeddingFormat("no data".into())), StatusCode::BAD_GATEWAY);
        assert_eq!(
            status_for(&Error::DimensionMismatch { expected: 1536, actual: 768 }),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(status_for(&Error::Storage("disk".into())), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
