//! Stubs and the request matching engine for protosim.
//!
//! # Matching
//!
//! ```text
//!   Frame ──► Request::resolve ──► StubStore::handle ──► Vec<Action>
//!                  │                     │
//!         PreparedRegistry        built-ins (fixed order)
//!         (id → query text)       user primes (newest first,
//!                                 filtered by Scope)
//! ```
//!
//! The first stub that matches wins. When none does the request is left
//! unanswered, which is how hangs are simulated. This crate does no I/O: the
//! server runs the returned actions on the connection.

mod action;
mod builtin;
mod node;
mod prime;
mod request;
mod store;
mod stub;

pub use action::{Action, CloseKind, DisconnectScope};
pub use builtin::Builtin;
pub use node::{NodeView, ServerInfo};
pub use prime::{
    BatchWhen, BoundParam, ParamValue, Prime, PrimeError, PrimeKind, PrimedResult, PrimedRows,
    QueryText, QueryWhen, Then, When,
};
pub use request::{prepared_id, PreparedRegistry, Request, ResolvedStatement};
pub use store::{Matched, StubStore};
pub use stub::{PrimedStub, Stub};
