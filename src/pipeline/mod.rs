//! Pipeline stages for turning a rules PDF into a summary.
//!
//! Each submodule implements one step and exposes it behind a trait, so the
//! job processor can be driven with fakes in tests.
//!
//! ## Data Flow
//!
//! ```text
//! source ──▶ extract ──▶ ocr ──▶ summarize
//! (PDF on disk) (page images) (ordered aggregate) (streamed text)
//! ```
//!
//! 1. [`source`]   : make sure `<pdf_root>/<id>.pdf` exists and is a PDF,
//!    downloading it when allowed
//! 2. [`extract`]  : run the external converter and discover page images
//! 3. [`ocr`]      : one concurrent OCR request per page, first error wins,
//!    results reassembled by page index
//! 4. [`summarize`]: stream the aggregate through the generation endpoint

pub mod extract;
pub mod ocr;
pub mod source;
pub mod summarize;
