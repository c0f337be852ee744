//! User-defined stubs ("primes").
//!
//! A [`Prime`] pairs a [`When`] predicate with a [`Then`] outcome and is
//! restricted to a [`Scope`] of the topology:
//!
//! ```text
//! Prime::new(
//!     QueryWhen::exact("SELECT * FROM ks.users WHERE id = ?")
//!         .with_param(BoundParam::positional(DataType::Int, 7)),
//!     PrimedResult::rows(vec![("name", DataType::Varchar)], vec![vec!["bob".into()]]),
//! )
//! .with_scope(Scope::cluster(ClusterId(0)))
//! ```

use crate::action::{CloseKind, DisconnectScope};
use protosim_protocol::{Consistency, CqlValue, DataType, ErrorBody, ValueError};
use protosim_types::Scope;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Errors rejecting a prime before it is stored.
#[derive(Debug, Error)]
pub enum PrimeError {
    #[error("Invalid query pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("Parameter {index} cannot be encoded: {source}")]
    Param { index: usize, source: ValueError },

    #[error("Row {row} has {got} values, expected {expected}")]
    RowWidth {
        row: usize,
        expected: usize,
        got: usize,
    },

    #[error("Row {row}, column {column} cannot be encoded: {source}")]
    Cell {
        row: usize,
        column: String,
        source: ValueError,
    },

    #[error("Named and positional parameters cannot be mixed")]
    MixedParams,

    #[error("A batch prime needs at least one statement")]
    EmptyBatch,
}

/// How the query text of a request is compared.
#[derive(Debug, Clone)]
pub enum QueryText {
    Exact(String),
    Pattern(Regex),
}

impl QueryText {
    pub fn matches(&self, query: &str) -> bool {
        match self {
            QueryText::Exact(text) => text == query,
            QueryText::Pattern(re) => re.is_match(query),
        }
    }
}

/// Value expected for a bound parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Value(CqlValue),
    /// Any value, including null and unset.
    Any,
}

/// One expected bind variable.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundParam {
    /// Set for named parameters; positional parameters match by order.
    pub name: Option<String>,
    pub ty: DataType,
    pub value: ParamValue,
}

impl BoundParam {
    pub fn positional(ty: DataType, value: impl Into<CqlValue>) -> Self {
        Self {
            name: None,
            ty,
            value: ParamValue::Value(value.into()),
        }
    }

    pub fn named(name: impl Into<String>, ty: DataType, value: impl Into<CqlValue>) -> Self {
        Self {
            name: Some(name.into()),
            ty,
            value: ParamValue::Value(value.into()),
        }
    }

    /// A parameter of the given type whose value is not checked.
    pub fn any(ty: DataType) -> Self {
        Self {
            name: None,
            ty,
            value: ParamValue::Any,
        }
    }
}

/// Predicate on a query, or on the query behind a prepared statement.
#[derive(Debug, Clone)]
pub struct QueryWhen {
    pub query: QueryText,
    /// Empty means any consistency.
    pub consistency: Vec<Consistency>,
    /// Empty means any values.
    pub params: Vec<BoundParam>,
}

impl QueryWhen {
    pub fn exact(query: impl Into<String>) -> Self {
        Self {
            query: QueryText::Exact(query.into()),
            consistency: Vec::new(),
            params: Vec::new(),
        }
    }

    pub fn pattern(pattern: &str) -> Result<Self, PrimeError> {
        Ok(Self {
            query: QueryText::Pattern(Regex::new(pattern)?),
            consistency: Vec::new(),
            params: Vec::new(),
        })
    }

    pub fn with_consistency(mut self, consistency: impl IntoIterator<Item = Consistency>) -> Self {
        self.consistency.extend(consistency);
        self
    }

    pub fn with_param(mut self, param: BoundParam) -> Self {
        self.params.push(param);
        self
    }
}

/// Predicate on a batch: one entry per statement, in order.
#[derive(Debug, Clone)]
pub struct BatchWhen {
    pub queries: Vec<QueryWhen>,
    pub consistency: Vec<Consistency>,
}

impl BatchWhen {
    pub fn new(queries: Vec<QueryWhen>) -> Self {
        Self {
            queries,
            consistency: Vec::new(),
        }
    }

    pub fn with_consistency(mut self, consistency: impl IntoIterator<Item = Consistency>) -> Self {
        self.consistency.extend(consistency);
        self
    }
}

#[derive(Debug, Clone)]
pub enum When {
    Query(QueryWhen),
    Batch(BatchWhen),
}

impl From<QueryWhen> for When {
    fn from(when: QueryWhen) -> Self {
        When::Query(when)
    }
}

impl From<BatchWhen> for When {
    fn from(when: BatchWhen) -> Self {
        When::Batch(when)
    }
}

/// Rows declared by a prime, one value per column.
#[derive(Debug, Clone, PartialEq)]
pub struct PrimedRows {
    pub columns: Vec<(String, DataType)>,
    pub rows: Vec<Vec<CqlValue>>,
}

/// The logical outcome of a matched prime.
#[derive(Debug, Clone, PartialEq)]
pub enum PrimedResult {
    Rows(PrimedRows),
    Void,
    SetKeyspace(String),
    Error {
        body: ErrorBody,
        /// When set, PREPARE of the query still succeeds and the error is
        /// only returned on EXECUTE.
        ignore_on_prepare: bool,
    },
    NoResponse,
    Close {
        scope: DisconnectScope,
        kind: CloseKind,
    },
    AuthChallenge(Option<Vec<u8>>),
}

impl PrimedResult {
    pub fn rows(columns: Vec<(&str, DataType)>, rows: Vec<Vec<CqlValue>>) -> Self {
        PrimedResult::Rows(PrimedRows {
            columns: columns
                .into_iter()
                .map(|(name, ty)| (name.to_string(), ty))
                .collect(),
            rows,
        })
    }

    pub fn error(body: ErrorBody) -> Self {
        PrimedResult::Error {
            body,
            ignore_on_prepare: true,
        }
    }

    pub fn close(scope: DisconnectScope, kind: CloseKind) -> Self {
        PrimedResult::Close { scope, kind }
    }
}

/// Outcome of a prime: a result, an optional delay before it, and an optional
/// close after it.
#[derive(Debug, Clone, PartialEq)]
pub struct Then {
    pub result: PrimedResult,
    pub delay: Duration,
    pub close_after: Option<(DisconnectScope, CloseKind)>,
}

impl Then {
    pub fn new(result: PrimedResult) -> Self {
        Self {
            result,
            delay: Duration::ZERO,
            close_after: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn then_close(mut self, scope: DisconnectScope, kind: CloseKind) -> Self {
        self.close_after = Some((scope, kind));
        self
    }
}

impl From<PrimedResult> for Then {
    fn from(result: PrimedResult) -> Self {
        Then::new(result)
    }
}

/// Kind of prime, used when clearing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrimeKind {
    Query,
    Batch,
    All,
}

impl PrimeKind {
    pub fn includes(self, other: PrimeKind) -> bool {
        self == PrimeKind::All || self == other
    }
}

/// A user-defined stub.
#[derive(Debug, Clone)]
pub struct Prime {
    pub when: When,
    pub then: Then,
    pub scope: Scope,
}

impl Prime {
    /// A prime applying to every node of every cluster.
    pub fn new(when: impl Into<When>, then: impl Into<Then>) -> Self {
        Self {
            when: when.into(),
            then: then.into(),
            scope: Scope::any(),
        }
    }

    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }

    pub fn kind(&self) -> PrimeKind {
        match self.when {
            When::Query(_) => PrimeKind::Query,
            When::Batch(_) => PrimeKind::Batch,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_text() {
        assert!(QueryText::Exact("SELECT 1".into()).matches("SELECT 1"));
        assert!(!QueryText::Exact("SELECT 1".into()).matches("select 1"));

        let when = QueryWhen::pattern("(?i)^select .* from ks\\.t$").unwrap();
        assert!(when.query.matches("SELECT a FROM ks.t"));
        assert!(!when.query.matches("SELECT a FROM ks.u"));
    }

    #[test]
    fn test_invalid_pattern() {
        assert!(matches!(
            QueryWhen::pattern("select ("),
            Err(PrimeError::Pattern(_))
        ));
    }

    #[test]
    fn test_prime_kind() {
        let query = Prime::new(QueryWhen::exact("q"), PrimedResult::Void);
        let batch = Prime::new(BatchWhen::new(vec![QueryWhen::exact("q")]), PrimedResult::Void);
        assert_eq!(query.kind(), PrimeKind::Query);
        assert_eq!(batch.kind(), PrimeKind::Batch);
        assert!(PrimeKind::All.includes(PrimeKind::Batch));
        assert!(!PrimeKind::Query.includes(PrimeKind::Batch));
    }
}
