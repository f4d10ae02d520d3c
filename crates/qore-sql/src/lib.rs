// SPDX-License-Identifier: Apache-2.0

//! SQL helpers shared by the QoreProxy filters.
//!
//! - **mysql**: wire framing, recognizes statement packets and extracts SQL text
//! - **classify**: statement operation classification
//! - **text**: whitespace normalization for logged statements

pub mod classify;
pub mod mysql;
pub mod text;

pub use classify::{NullClassifier, ParserClassifier, QueryClassifier, QueryOperation};
pub use mysql::{MySqlExtractor, SqlExtractor};
pub use text::normalize_whitespace;
