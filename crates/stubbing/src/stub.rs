//! The closed set of stubs and the matching/action contract they share.

use crate::action::Action;
use crate::builtin::Builtin;
use crate::node::NodeView;
use crate::prime::{
    BatchWhen, ParamValue, Prime, PrimeError, PrimedResult, QueryText, QueryWhen, When,
};
use crate::request::{prepared_id, Request};
use bytes::Bytes;
use protosim_protocol::{
    AuthToken, BoundValues, ColumnSpec, Consistency, DataType, Message, Prepared,
    PreparedMetadata, QueryParameters, RawValue, ResultBody, Rows, RowsMetadata,
};
use std::sync::Arc;

/// A bind variable with its expected value already encoded.
#[derive(Debug, Clone)]
struct ExpectedParam {
    name: Option<String>,
    ty: DataType,
    /// `None` accepts anything; `Some(None)` expects null.
    value: Option<Option<Bytes>>,
}

#[derive(Debug, Clone)]
struct CompiledQuery {
    text: QueryText,
    consistency: Vec<Consistency>,
    params: Vec<ExpectedParam>,
}

impl CompiledQuery {
    fn compile(when: &QueryWhen) -> Result<Self, PrimeError> {
        let named = when.params.iter().filter(|p| p.name.is_some()).count();
        if named != 0 && named != when.params.len() {
            return Err(PrimeError::MixedParams);
        }
        let params = when
            .params
            .iter()
            .enumerate()
            .map(|(index, param)| {
                let value = match &param.value {
                    ParamValue::Any => None,
                    ParamValue::Value(v) => Some(
                        v.encode(&param.ty)
                            .map_err(|source| PrimeError::Param { index, source })?,
                    ),
                };
                Ok(ExpectedParam {
                    name: param.name.clone(),
                    ty: param.ty.clone(),
                    value,
                })
            })
            .collect::<Result<Vec<_>, PrimeError>>()?;
        Ok(Self {
            text: when.query.clone(),
            consistency: when.consistency.clone(),
            params,
        })
    }

    fn matches_text(&self, text: Option<&str>) -> bool {
        text.is_some_and(|t| self.text.matches(t))
    }

    fn matches_consistency(&self, consistency: Consistency) -> bool {
        self.consistency.is_empty() || self.consistency.contains(&consistency)
    }

    /// An empty expectation accepts any values.
    fn matches_values(&self, values: Option<&BoundValues>) -> bool {
        if self.params.is_empty() {
            return true;
        }
        let Some(values) = values else {
            return false;
        };
        if values.len() != self.params.len() {
            return false;
        }
        self.params.iter().enumerate().all(|(i, expected)| {
            let actual = match values {
                BoundValues::Positional(values) => values.get(i),
                BoundValues::Named(values) => expected.name.as_deref().and_then(|name| {
                    values.iter().find(|(n, _)| n == name).map(|(_, v)| v)
                }),
            };
            match (&expected.value, actual) {
                (_, None) => false,
                (None, Some(_)) => true,
                (Some(None), Some(RawValue::Null)) => true,
                (Some(Some(want)), Some(RawValue::Set(got))) => want == got,
                _ => false,
            }
        })
    }

    fn matches_params(&self, params: &QueryParameters) -> bool {
        self.matches_consistency(params.consistency) && self.matches_values(params.values.as_ref())
    }

    /// Bind-variable metadata for a PREPARED answer.
    fn bind_columns(&self) -> Vec<ColumnSpec> {
        self.params
            .iter()
            .enumerate()
            .map(|(i, p)| {
                let name = p.name.clone().unwrap_or_else(|| format!("arg{}", i));
                ColumnSpec::new("", "", name, p.ty.clone())
            })
            .collect()
    }
}

#[derive(Debug, Clone)]
enum CompiledWhen {
    Query(CompiledQuery),
    Batch {
        statements: Vec<CompiledQuery>,
        consistency: Vec<Consistency>,
    },
}

/// A validated prime with parameters and rows encoded up front.
#[derive(Debug)]
pub struct PrimedStub {
    prime: Prime,
    when: CompiledWhen,
    rows: Option<Rows>,
}

impl PrimedStub {
    pub fn compile(prime: Prime) -> Result<Self, PrimeError> {
        let when = match &prime.when {
            When::Query(query) => CompiledWhen::Query(CompiledQuery::compile(query)?),
            When::Batch(BatchWhen {
                queries,
                consistency,
            }) => {
                if queries.is_empty() {
                    return Err(PrimeError::EmptyBatch);
                }
                CompiledWhen::Batch {
                    statements: queries
                        .iter()
                        .map(CompiledQuery::compile)
                        .collect::<Result<_, _>>()?,
                    consistency: consistency.clone(),
                }
            }
        };

        let rows = match &prime.then.result {
            PrimedResult::Rows(primed) => {
                let mut rows = Vec::with_capacity(primed.rows.len());
                for (r, row) in primed.rows.iter().enumerate() {
                    if row.len() != primed.columns.len() {
                        return Err(PrimeError::RowWidth {
                            row: r,
                            expected: primed.columns.len(),
                            got: row.len(),
                        });
                    }
                    let cells = row
                        .iter()
                        .zip(&primed.columns)
                        .map(|(value, (name, ty))| {
                            value.encode(ty).map_err(|source| PrimeError::Cell {
                                row: r,
                                column: name.clone(),
                                source,
                            })
                        })
                        .collect::<Result<Vec<_>, _>>()?;
                    rows.push(cells);
                }
                let columns = primed
                    .columns
                    .iter()
                    .map(|(name, ty)| ColumnSpec::new("", "", name.clone(), ty.clone()))
                    .collect();
                Some(Rows {
                    metadata: RowsMetadata::new(columns),
                    rows,
                })
            }
            _ => None,
        };

        Ok(Self { prime, when, rows })
    }

    pub fn prime(&self) -> &Prime {
        &self.prime
    }

    fn matches(&self, request: &Request<'_>) -> bool {
        match (&self.when, request) {
            (CompiledWhen::Query(query), Request::Query { text, params }) => {
                query.text.matches(text) && query.matches_params(params)
            }
            (CompiledWhen::Query(query), Request::Prepare { text }) => query.text.matches(text),
            (CompiledWhen::Query(query), Request::Execute { text, params }) => {
                query.matches_text(text.as_deref()) && query.matches_params(params)
            }
            (
                CompiledWhen::Batch {
                    statements,
                    consistency,
                },
                Request::Batch {
                    statements: actual,
                    consistency: actual_consistency,
                },
            ) => {
                (consistency.is_empty() || consistency.contains(actual_consistency))
                    && statements.len() == actual.len()
                    && statements.iter().zip(actual).all(|(expected, statement)| {
                        expected.matches_text(statement.text.as_deref())
                            && expected.matches_values(Some(statement.values))
                    })
            }
            _ => false,
        }
    }

    fn result_message(&self, request: &Request<'_>) -> Option<Action> {
        let message = match &self.prime.then.result {
            PrimedResult::Rows(_) => {
                let mut rows = self.rows.clone().unwrap_or_default();
                let skip_metadata = match request {
                    Request::Execute { params, .. } => params.skip_metadata,
                    _ => false,
                };
                if skip_metadata {
                    rows.metadata.columns = None;
                }
                Message::Result(ResultBody::Rows(rows))
            }
            PrimedResult::Void => Message::Result(ResultBody::Void),
            PrimedResult::SetKeyspace(keyspace) => {
                Message::Result(ResultBody::SetKeyspace(keyspace.clone()))
            }
            PrimedResult::Error { body, .. } => Message::Error(body.clone()),
            PrimedResult::AuthChallenge(token) => Message::AuthChallenge(AuthToken {
                token: token.as_deref().map(Bytes::copy_from_slice),
            }),
            PrimedResult::NoResponse => return Some(Action::NoResponse),
            PrimedResult::Close { scope, kind } => {
                return Some(Action::Close {
                    scope: *scope,
                    kind: *kind,
                })
            }
        };
        Some(Action::Respond(message))
    }

    fn prepared(&self, text: &str) -> Prepared {
        let (bind_columns, pk_indexes) = match &self.when {
            CompiledWhen::Query(query) => (query.bind_columns(), Vec::new()),
            CompiledWhen::Batch { .. } => (Vec::new(), Vec::new()),
        };
        let result_columns = self
            .rows
            .as_ref()
            .and_then(|rows| rows.metadata.columns.clone())
            .unwrap_or_default();
        let metadata_id = {
            let described: Vec<String> = result_columns
                .iter()
                .map(|c| format!("{}:{}", c.name, c.ty))
                .collect();
            prepared_id(&described.join(","))
        };
        Prepared {
            id: prepared_id(text),
            result_metadata_id: Some(metadata_id),
            metadata: PreparedMetadata {
                pk_indexes,
                columns: bind_columns,
            },
            result_metadata: RowsMetadata::new(result_columns),
        }
    }

    fn actions(&self, request: &Request<'_>) -> Vec<Action> {
        let then = &self.prime.then;

        if let Request::Prepare { text } = request {
            return match &then.result {
                PrimedResult::Error {
                    body,
                    ignore_on_prepare: false,
                } => vec![Action::Respond(Message::Error(body.clone()))],
                _ => vec![Action::Respond(Message::Result(ResultBody::Prepared(
                    self.prepared(text),
                )))],
            };
        }

        let mut actions = Vec::with_capacity(3);
        if !then.delay.is_zero() {
            actions.push(Action::Delay(then.delay));
        }
        actions.extend(self.result_message(request));
        if let Some((scope, kind)) = then.close_after {
            actions.push(Action::Close { scope, kind });
        }
        actions
    }
}

/// A stub: built in, or primed by a user.
#[derive(Debug, Clone)]
pub enum Stub {
    Builtin(Builtin),
    Primed(Arc<PrimedStub>),
}

impl Stub {
    pub fn matches(&self, request: &Request<'_>) -> bool {
        match self {
            Stub::Builtin(builtin) => builtin.matches(request),
            Stub::Primed(primed) => primed.matches(request),
        }
    }

    pub fn actions(&self, node: &NodeView<'_>, request: &Request<'_>) -> Vec<Action> {
        match self {
            Stub::Builtin(builtin) => builtin.actions(node, request),
            Stub::Primed(primed) => primed.actions(request),
        }
    }

    pub fn is_primed(&self) -> bool {
        matches!(self, Stub::Primed(_))
    }
}
