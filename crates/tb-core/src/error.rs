// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Author: Pushp Kharat

//! Error types for the TABULA system.

use thiserror::Error;

/// Errors that can occur during data preparation.
///
/// User interruption and time-budget expiry are *not* errors: builders and
/// optimizers return their best incumbent in those cases. Only genuinely
/// invalid inputs and numeric edges surface here.
#[derive(Error, Debug, Clone)]
pub enum PrepError {
    /// A parameter was rejected at setter time.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// A class name could not be resolved in the schema domain.
    #[error("Unknown class: {0}")]
    UnknownClass(String),

    /// An attribute name could not be resolved in its class.
    #[error("Unknown attribute: {0}")]
    UnknownAttribute(String),

    /// An attribute name is already taken in its class.
    #[error("Duplicate attribute: {0}")]
    DuplicateAttribute(String),

    /// The schema domain is structurally inconsistent.
    #[error("Schema inconsistency: {0}")]
    SchemaError(String),

    /// The random drawing number exceeded the representable budget (> 1e100).
    #[error("Random drawing number overflow")]
    DrawingOverflow,
}

/// Result type for data-preparation operations.
pub type PrepResult<T> = Result<T, PrepError>;
