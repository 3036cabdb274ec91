//! # revdata API
//!
//! HTTP front end for the import pipeline.
//!
//! | method | path | answer |
//! |---|---|---|
//! | `POST` | `/datasets/upload` | `202 {dataset, job}` |
//! | `POST` | `/datasets/{id}/append` | `202 {job}` |
//! | `POST` | `/datasets/detect-fields` | `200` preview report |
//! | `GET` | `/datasets` | all datasets |
//! | `GET` | `/datasets/{id}` | one dataset |
//! | `GET` | `/jobs/{id}` | import job state |
//! | `GET` | `/queue` | import queue counters |
//!
//! Uploads are multipart forms with a `file` part plus `name`, and optionally
//! `description`, `field_mapping` and `dedup_config` as JSON strings.
//! Errors come back as `{"error": message}`.

pub mod rest;

pub use rest::{configure, status_for, ApiError, RestApi};
