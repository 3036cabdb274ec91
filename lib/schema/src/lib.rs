//! # revdata Schema
//!
//! Infers which record keys play which role in a review item.
//!
//! ## Overview
//!
//! Uploaded corpora rarely agree on key names: one file says
//! `instruction`/`output`, the next `prompt`/`completion`, a third ships
//! OpenAI-style `messages`. The detector looks at the top-level keys of the
//! first few records and maps them onto the roles of a [`FieldMapping`]:
//!
//! | role | candidates (first match wins) |
//! |---|---|
//! | question | `instruction, question, prompt, input, query, user, human` |
//! | answer | `output, answer, completion, response, assistant, bot, reply` |
//! | thinking | `thinking, reasoning, thought, chain_of_thought, cot, rationale` |
//! | context | `system, system_prompt, context, instruction_prefix` |
//! | messages | `messages, conversations, dialogue, chat, turns` |
//! | image | `image, images, img, imgs, picture, pictures` |
//!
//! Everything left over becomes metadata.
//!
//! ```rust
//! use revdata_schema::detect;
//! use revdata_core::DisplayMode;
//! use serde_json::json;
//!
//! let records = vec![json!({"prompt": "2+2?", "completion": "4", "source": "math"})];
//! let detection = detect(&records, 10);
//! assert_eq!(detection.suggested_mapping.question_field.as_deref(), Some("prompt"));
//! assert_eq!(detection.suggested_mapping.display_mode, DisplayMode::QaPair);
//! assert_eq!(detection.suggested_mapping.metadata_fields, vec!["source"]);
//! ```
//!
//! [`FieldMapping`]: revdata_core::FieldMapping

pub mod classify;
pub mod detect;
pub mod report;

pub use classify::classify_item;
pub use detect::{detect, FieldDetection, DEFAULT_SAMPLE_SIZE};
pub use report::PreviewReport;
