//! Per-page pipeline stages.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ render ──▶ encode ──▶ llm ──(retry)──▶ page ──▶ ledger
//! (path)    (pdfium)   (base64)   (VLM)            (classify + record)
//! ```
//!
//! 1. [`input`]  — discover the batch's source files and validate them
//! 2. [`render`] — open a document, count its pages, rasterise one page on
//!    demand; runs in `spawn_blocking` because pdfium is blocking
//! 3. [`encode`] — PNG-encode and base64-wrap a rendered page
//! 4. [`llm`]    — the recognition seam and its VLM-backed implementation
//! 5. [`retry`]  — bounded retry policy, independent of what it retries
//! 6. [`page`]   — the page processor tying the above together

pub mod encode;
pub mod input;
pub mod llm;
pub mod page;
pub mod render;
pub mod retry;
