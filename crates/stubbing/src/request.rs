//! Requests as the matching engine sees them.
//!
//! EXECUTE and prepared batch statements only carry an id on the wire. The
//! [`PreparedRegistry`] maps ids handed out in PREPARED results back to query
//! text, so primes can match executions by text like plain queries.

use bytes::Bytes;
use dashmap::DashMap;
use protosim_protocol::{
    BatchStatement, BoundValues, Consistency, Frame, Message, QueryParameters,
};
use std::sync::Arc;

/// Id of a prepared statement: the first 16 bytes of the BLAKE3 hash of its text.
pub fn prepared_id(query: &str) -> Bytes {
    let hash = blake3::hash(query.as_bytes());
    Bytes::copy_from_slice(&hash.as_bytes()[..16])
}

/// Prepared ids handed out so far, shared by every node of a server.
#[derive(Debug, Default)]
pub struct PreparedRegistry {
    statements: DashMap<Bytes, Arc<str>>,
}

impl PreparedRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, id: Bytes, query: &str) {
        self.statements.insert(id, Arc::from(query));
    }

    pub fn get(&self, id: &Bytes) -> Option<Arc<str>> {
        self.statements.get(id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn len(&self) -> usize {
        self.statements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    pub fn clear(&self) {
        self.statements.clear();
    }
}

/// One statement of a batch, with its text resolved when possible.
#[derive(Debug, Clone)]
pub struct ResolvedStatement<'a> {
    /// `None` for a prepared id nobody handed out.
    pub text: Option<Arc<str>>,
    pub values: &'a BoundValues,
}

/// A decoded request with prepared ids resolved to text.
#[derive(Debug, Clone)]
pub enum Request<'a> {
    Startup,
    Options,
    Register,
    AuthResponse,
    Query {
        text: &'a str,
        params: &'a QueryParameters,
    },
    Prepare {
        text: &'a str,
    },
    Execute {
        text: Option<Arc<str>>,
        params: &'a QueryParameters,
    },
    Batch {
        statements: Vec<ResolvedStatement<'a>>,
        consistency: Consistency,
    },
}

impl<'a> Request<'a> {
    /// Resolve a request frame. Returns `None` for response messages.
    pub fn resolve(frame: &'a Frame, prepared: &PreparedRegistry) -> Option<Self> {
        Some(match &frame.message {
            Message::Startup(_) => Request::Startup,
            Message::Options => Request::Options,
            Message::Register(_) => Request::Register,
            Message::AuthResponse(_) => Request::AuthResponse,
            Message::Query(query) => Request::Query {
                text: &query.query,
                params: &query.params,
            },
            Message::Prepare(prepare) => Request::Prepare {
                text: &prepare.query,
            },
            Message::Execute(execute) => Request::Execute {
                text: prepared.get(&execute.id),
                params: &execute.params,
            },
            Message::Batch(batch) => Request::Batch {
                statements: batch
                    .statements
                    .iter()
                    .map(|statement| match statement {
                        BatchStatement::Query { query, values } => ResolvedStatement {
                            text: Some(Arc::from(query.as_str())),
                            values,
                        },
                        BatchStatement::Prepared { id, values } => ResolvedStatement {
                            text: prepared.get(id),
                            values,
                        },
                    })
                    .collect(),
                consistency: batch.consistency,
            },
            _ => return None,
        })
    }

    /// Query text, when the request has one.
    pub fn text(&self) -> Option<&str> {
        match self {
            Request::Query { text, .. } | Request::Prepare { text } => Some(*text),
            Request::Execute { text, .. } => text.as_deref(),
            _ => None,
        }
    }
}
