//! The ordered stub list consulted for every request.

use crate::action::Action;
use crate::builtin::Builtin;
use crate::node::NodeView;
use crate::prime::{Prime, PrimeError, PrimeKind};
use crate::request::{PreparedRegistry, Request};
use crate::stub::{PrimedStub, Stub};
use parking_lot::RwLock;
use protosim_protocol::{Frame, Message, ResultBody};
use protosim_types::Scope;
use std::sync::Arc;
use tracing::{debug, trace};

/// Outcome of matching one request frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Matched {
    pub actions: Vec<Action>,
    /// False when a built-in stub answered.
    pub primed: bool,
}

/// Built-in stubs followed by user primes, newest first.
///
/// Primes are written rarely and read on every frame, so the list sits behind
/// a read-write lock and matching works on a snapshot of `Arc`s.
#[derive(Debug)]
pub struct StubStore {
    builtins: Vec<Builtin>,
    primes: RwLock<Vec<Arc<PrimedStub>>>,
    prepared: PreparedRegistry,
}

impl StubStore {
    pub fn new() -> Self {
        Self {
            builtins: Builtin::ALL.to_vec(),
            primes: RwLock::new(Vec::new()),
            prepared: PreparedRegistry::new(),
        }
    }

    /// Validate and add a prime. It takes precedence over every earlier prime.
    pub fn prime(&self, prime: Prime) -> Result<(), PrimeError> {
        let stub = PrimedStub::compile(prime)?;
        debug!(scope = %stub.prime().scope, kind = ?stub.prime().kind(), "Prime added");
        self.primes.write().push(Arc::new(stub));
        Ok(())
    }

    /// Remove primes of `kind` whose scope lies within `scope`.
    ///
    /// Returns how many were removed. Built-in stubs are never removed.
    pub fn clear(&self, scope: &Scope, kind: PrimeKind) -> usize {
        let mut primes = self.primes.write();
        let before = primes.len();
        primes.retain(|stub| {
            let prime = stub.prime();
            !(kind.includes(prime.kind()) && scope.covers(&prime.scope))
        });
        let removed = before - primes.len();
        debug!(%scope, ?kind, removed, "Primes cleared");
        removed
    }

    /// Number of user primes.
    pub fn len(&self) -> usize {
        self.primes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.primes.read().is_empty()
    }

    pub fn prepared(&self) -> &PreparedRegistry {
        &self.prepared
    }

    /// Stubs in the order they are consulted for `node`.
    fn candidates(&self, node: &NodeView<'_>) -> Vec<Stub> {
        let primes = self.primes.read();
        self.builtins
            .iter()
            .copied()
            .map(Stub::Builtin)
            .chain(
                primes
                    .iter()
                    .rev()
                    .filter(|stub| stub.prime().scope.contains(&node.key))
                    .cloned()
                    .map(Stub::Primed),
            )
            .collect()
    }

    /// Find the first stub matching `frame` and produce its actions.
    ///
    /// Returns `None` when nothing matches; the request then gets no answer.
    pub fn handle(&self, node: &NodeView<'_>, frame: &Frame) -> Option<Matched> {
        let request = Request::resolve(frame, &self.prepared)?;
        let stub = self
            .candidates(node)
            .into_iter()
            .find(|stub| stub.matches(&request));

        let Some(stub) = stub else {
            trace!(node = %node.key, opcode = %frame.opcode(), "No stub matched");
            return None;
        };

        let actions = stub.actions(node, &request);
        if let Request::Prepare { text } = &request {
            for action in &actions {
                if let Action::Respond(Message::Result(ResultBody::Prepared(prepared))) = action {
                    self.prepared.insert(prepared.id.clone(), text);
                }
            }
        }
        trace!(
            node = %node.key,
            opcode = %frame.opcode(),
            primed = stub.is_primed(),
            actions = actions.len(),
            "Stub matched"
        );
        Some(Matched {
            actions,
            primed: stub.is_primed(),
        })
    }
}

impl Default for StubStore {
    fn default() -> Self {
        Self::new()
    }
}
