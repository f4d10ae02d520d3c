// SPDX-License-Identifier: Apache-2.0

//! Filter error types
//!
//! Configuration errors fail filter-instance construction, resource errors
//! fail the construction of a single session. Nothing in the filter core is
//! retried; every failure is returned to the caller.

use thiserror::Error;

/// Unified error type for filter operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FilterError {
    #[error("Invalid regular expression '{pattern}' for the '{param}' parameter: {message}")]
    InvalidPattern {
        param: String,
        pattern: String,
        message: String,
    },

    #[error("No '{param}' parameter defined")]
    MissingParameter { param: String },

    #[error("Unexpected parameter '{name}'")]
    UnexpectedParameter { name: String },

    #[error("Unsupported option '{option}'")]
    UnsupportedOption { option: String },

    #[error("Invalid value '{value}' for the '{param}' parameter")]
    InvalidValue { param: String, value: String },

    #[error("Unknown filter module: {module}")]
    UnknownModule { module: String },

    #[error("Filter '{name}' is defined more than once")]
    DuplicateFilter { name: String },

    #[error("Invalid service definition: {message}")]
    Definition { message: String },

    #[error("Failed to open output file {path}: {message}")]
    OutputFile { path: String, message: String },

    #[error("I/O error: {message}")]
    Io { message: String },

    #[error("Filter chain is not wired: {message}")]
    Unwired { message: String },
}

impl FilterError {
    pub fn invalid_pattern(
        param: impl Into<String>,
        pattern: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::InvalidPattern {
            param: param.into(),
            pattern: pattern.into(),
            message: message.into(),
        }
    }

    pub fn missing_parameter(param: impl Into<String>) -> Self {
        Self::MissingParameter { param: param.into() }
    }

    pub fn unexpected_parameter(name: impl Into<String>) -> Self {
        Self::UnexpectedParameter { name: name.into() }
    }

    pub fn unsupported_option(option: impl Into<String>) -> Self {
        Self::UnsupportedOption { option: option.into() }
    }

    pub fn invalid_value(param: impl Into<String>, value: impl Into<String>) -> Self {
        Self::InvalidValue {
            param: param.into(),
            value: value.into(),
        }
    }

    pub fn unknown_module(module: impl Into<String>) -> Self {
        Self::UnknownModule { module: module.into() }
    }

    pub fn definition(msg: impl Into<String>) -> Self {
        Self::Definition { message: msg.into() }
    }

    pub fn output_file(path: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::OutputFile {
            path: path.into(),
            message: msg.into(),
        }
    }

    pub fn io(msg: impl Into<String>) -> Self {
        Self::Io { message: msg.into() }
    }

    pub fn unwired(msg: impl Into<String>) -> Self {
        Self::Unwired { message: msg.into() }
    }

    /// Errors that prevent a filter instance from being created
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            Self::InvalidPattern { .. }
                | Self::MissingParameter { .. }
                | Self::UnexpectedParameter { .. }
                | Self::UnsupportedOption { .. }
                | Self::InvalidValue { .. }
                | Self::UnknownModule { .. }
                | Self::DuplicateFilter { .. }
                | Self::Definition { .. }
        )
    }

    /// Errors that prevent a single session from being created
    pub fn is_resource(&self) -> bool {
        matches!(self, Self::OutputFile { .. } | Self::Io { .. })
    }
}

impl From<std::io::Error> for FilterError {
    fn from(err: std::io::Error) -> Self {
        Self::io(err.to_string())
    }
}

/// Result type alias for filter operations
pub type FilterResult<T> = Result<T, FilterError>;
