// SPDX-License-Identifier: Apache-2.0

//! Statement classification
//!
//! Decides which operation a statement performs. Only a plain read is
//! classified as [`QueryOperation::Select`]; everything the classifier cannot
//! identify ends up as [`QueryOperation::Other`].

use serde::{Deserialize, Serialize};
use sqlparser::ast::Statement;
use sqlparser::dialect::MySqlDialect;
use sqlparser::parser::Parser;
use sqlparser::tokenizer::{Token, Tokenizer};

/// Query operation type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryOperation {
    Select,
    Insert,
    Update,
    Delete,
    Create,
    Alter,
    Drop,
    Truncate,
    Grant,
    Revoke,
    Execute,
    Other,
}

impl Default for QueryOperation {
    fn default() -> Self {
        Self::Other
    }
}

impl QueryOperation {
    /// Returns true only for a plain read
    pub fn is_read(&self) -> bool {
        matches!(self, Self::Select)
    }

    /// Returns true if this operation may modify data.
    ///
    /// Unclassified statements count as modifying.
    pub fn is_mutation(&self) -> bool {
        !self.is_read()
    }

    fn from_keyword(keyword: &str) -> Self {
        match keyword {
            "SELECT" => Self::Select,
            "INSERT" | "REPLACE" => Self::Insert,
            "UPDATE" => Self::Update,
            "DELETE" => Self::Delete,
            "CREATE" => Self::Create,
            "ALTER" => Self::Alter,
            "DROP" => Self::Drop,
            "TRUNCATE" => Self::Truncate,
            "GRANT" => Self::Grant,
            "REVOKE" => Self::Revoke,
            "EXEC" | "EXECUTE" | "CALL" => Self::Execute,
            _ => Self::Other,
        }
    }
}

/// Classifies statement text
pub trait QueryClassifier: Send + Sync {
    fn operation(&self, sql: &str) -> QueryOperation;
}

/// Classifier backed by `sqlparser`, falling back to the leading keyword
/// when the statement does not parse.
#[derive(Debug, Clone, Copy, Default)]
pub struct ParserClassifier;

impl ParserClassifier {
    pub fn new() -> Self {
        Self
    }
}

impl QueryClassifier for ParserClassifier {
    fn operation(&self, sql: &str) -> QueryOperation {
        classify_operation(sql)
    }
}

/// Classifier that knows nothing; every statement is [`QueryOperation::Other`]
#[derive(Debug, Clone, Copy, Default)]
pub struct NullClassifier;

impl QueryClassifier for NullClassifier {
    fn operation(&self, _sql: &str) -> QueryOperation {
        QueryOperation::Other
    }
}

/// Classifies a statement.
///
/// A batch of several statements is a read only if every statement is one.
pub fn classify_operation(sql: &str) -> QueryOperation {
    let dialect = MySqlDialect {};
    match Parser::parse_sql(&dialect, sql.trim()) {
        Ok(statements) if !statements.is_empty() => {
            if statements.iter().all(|s| matches!(s, Statement::Query(_))) {
                QueryOperation::Select
            } else {
                let op = leading_keyword(sql)
                    .map(|k| QueryOperation::from_keyword(&k))
                    .unwrap_or_default();
                // A non-query statement starting with SELECT is still not a read
                if op.is_read() {
                    QueryOperation::Other
                } else {
                    op
                }
            }
        }
        _ => leading_keyword(sql)
            .map(|k| QueryOperation::from_keyword(&k))
            .unwrap_or_default(),
    }
}

/// First word of the statement, skipping whitespace and comments
fn leading_keyword(sql: &str) -> Option<String> {
    let dialect = MySqlDialect {};
    match Tokenizer::new(&dialect, sql).tokenize() {
        Ok(tokens) => tokens.into_iter().find_map(|token| match token {
            Token::Whitespace(_) | Token::LParen => None,
            Token::Word(word) => Some(Some(word.value.to_uppercase())),
            _ => Some(None),
        })?,
        Err(_) => sql
            .split_whitespace()
            .next()
            .map(|word| word.to_uppercase()),
    }
}
