//! Per-call routing context and the master/replica decision.
//!
//! Routing inputs travel with each call in an [`ExecutionContext`] value.
//! Nothing is stored in thread or task locals: a caller that spawns work
//! hands the context (it is `Clone`) to the spawned task explicitly, and the
//! hint ends when the value is dropped.

use super::classifier::classify;
use crate::models::Role;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Read-only view of a transaction manager.
///
/// Asked each time a statement is routed, so a transaction opened after the
/// context was built still pins later statements to the master.
pub trait TransactionState: Send + Sync {
    fn is_transaction_active(&self) -> bool;
}

impl TransactionState for bool {
    fn is_transaction_active(&self) -> bool {
        *self
    }
}

impl TransactionState for AtomicBool {
    fn is_transaction_active(&self) -> bool {
        self.load(Ordering::Acquire)
    }
}

/// Routing inputs for a single call.
#[derive(Clone, Default)]
pub struct ExecutionContext {
    master_hint: bool,
    transaction: Option<Arc<dyn TransactionState>>,
    database: Option<String>,
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("master_hint", &self.master_hint)
            .field("transaction_active", &self.is_transaction_active())
            .field("database", &self.database)
            .finish()
    }
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Force every statement issued with this context to the master.
    pub fn force_master(self) -> Self {
        self.with_master_hint(true)
    }

    pub fn with_master_hint(mut self, master: bool) -> Self {
        self.master_hint = master;
        self
    }

    /// Attach the external transaction manager. Its state is read when each
    /// statement is routed, not when the context is built.
    pub fn with_transaction(mut self, state: Arc<dyn TransactionState>) -> Self {
        self.transaction = Some(state);
        self
    }

    /// Target a logical database by name, overriding the entity's own.
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    pub fn master_hint(&self) -> bool {
        self.master_hint
    }

    pub fn is_transaction_active(&self) -> bool {
        self.transaction
            .as_ref()
            .is_some_and(|state| state.is_transaction_active())
    }

    pub fn database(&self) -> Option<&str> {
        self.database.as_deref()
    }
}

/// Why a role was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteReason {
    Hint,
    Transaction,
    Write,
    MasterOnly,
    Read,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RouteDecision {
    pub role: Role,
    pub reason: RouteReason,
}

/// True when the statement must run on the master.
///
/// Precedence: hint, then active transaction, then write classification.
pub fn requires_master(ctx: &ExecutionContext, sql: &str) -> bool {
    ctx.master_hint || ctx.is_transaction_active() || classify(sql).is_write()
}

/// Decide the role for a statement against a database that may be master-only.
pub fn resolve_role(ctx: &ExecutionContext, sql: &str, master_only: bool) -> RouteDecision {
    let (role, reason) = if ctx.master_hint {
        (Role::Master, RouteReason::Hint)
    } else if ctx.is_transaction_active() {
        (Role::Master, RouteReason::Transaction)
    } else if classify(sql).is_write() {
        (Role::Master, RouteReason::Write)
    } else if master_only {
        (Role::Master, RouteReason::MasterOnly)
    } else {
        (Role::Replica, RouteReason::Read)
    };
    RouteDecision { role, reason }
}
