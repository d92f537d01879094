//! Statement pipeline with user interceptors and a terminal routing step.
//!
//! Every statement flows through the interceptors in registration order,
//! then through the routing step, which:
//! 1. resolves the logical database (context override, then the statement's
//!    declared database, then the registry default),
//! 2. decides master or replica,
//! 3. checks out a connection of that role,
//! 4. runs the statement on it,
//! 5. returns the connection to its pool.
//!
//! The connection is owned by the routing step for the duration of the
//! statement only. It goes back to the pool on success, on error, and when
//! the caller drops the future.

use crate::db::executor::{RouteInfo, Statement, StatementResult, StatementRunner};
use crate::db::registry::DatabaseRegistry;
use crate::db::routing::{ExecutionContext, RouteReason, resolve_role};
use crate::error::DbResult;
use crate::models::{DatabaseType, Role};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{Instrument, debug, info_span};

/// A user-supplied pipeline step.
///
/// `before_execute` may rewrite the statement or veto it by returning an
/// error, in which case nothing later in the chain runs. `after_execute`
/// observes the outcome, in reverse registration order, for every
/// interceptor whose `before_execute` succeeded. A veto reaches them as the
/// error result.
#[async_trait]
pub trait StatementInterceptor: Send + Sync {
    async fn before_execute(
        &self,
        _statement: &mut Statement,
        _ctx: &ExecutionContext,
    ) -> DbResult<()> {
        Ok(())
    }

    async fn after_execute(&self, _statement: &Statement, _result: &DbResult<StatementResult>) {}
}

/// Routing decision for a statement, without executing it.
#[derive(Debug, Clone, Serialize)]
pub struct RoutePlan {
    pub database: String,
    pub datasource: String,
    pub role: Role,
    pub reason: RouteReason,
}

/// Builder for [`StatementPipeline`].
pub struct PipelineBuilder {
    registry: Arc<DatabaseRegistry>,
    interceptors: Vec<Arc<dyn StatementInterceptor>>,
    statement_timeout: Duration,
}

impl PipelineBuilder {
    /// Append an interceptor. Interceptors run in the order added.
    pub fn interceptor(mut self, interceptor: Arc<dyn StatementInterceptor>) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    pub fn statement_timeout(mut self, timeout: Duration) -> Self {
        self.statement_timeout = timeout;
        self
    }

    pub fn build(self) -> StatementPipeline {
        StatementPipeline {
            registry: self.registry,
            interceptors: self.interceptors,
            runner: StatementRunner::new(self.statement_timeout),
        }
    }
}

/// Ordered interceptor chain ending in the routing executor.
pub struct StatementPipeline {
    registry: Arc<DatabaseRegistry>,
    interceptors: Vec<Arc<dyn StatementInterceptor>>,
    runner: StatementRunner,
}

impl StatementPipeline {
    pub fn builder(registry: Arc<DatabaseRegistry>) -> PipelineBuilder {
        PipelineBuilder {
            registry,
            interceptors: Vec::new(),
            statement_timeout: Duration::from_secs(crate::config::DEFAULT_STATEMENT_TIMEOUT_SECS),
        }
    }

    /// Pipeline with no user interceptors.
    pub fn new(registry: Arc<DatabaseRegistry>) -> Self {
        Self::builder(registry).build()
    }

    pub fn registry(&self) -> &Arc<DatabaseRegistry> {
        &self.registry
    }

    /// Backend of the database a statement for `declared` would target.
    pub fn database_type(
        &self,
        ctx: &ExecutionContext,
        declared: Option<&str>,
    ) -> DbResult<DatabaseType> {
        let db = self.registry.resolve(ctx.database().or(declared))?;
        Ok(db.db_type())
    }

    /// Work out where `sql` would run.
    ///
    /// Advances the replica rotation exactly like a real execution.
    pub fn route(
        &self,
        ctx: &ExecutionContext,
        sql: &str,
        declared: Option<&str>,
    ) -> DbResult<RoutePlan> {
        let db = self.registry.resolve(ctx.database().or(declared))?;
        let decision = resolve_role(ctx, sql, db.is_master_only());
        let ds = db.select(decision.role);
        Ok(RoutePlan {
            database: db.name().to_string(),
            datasource: ds.name().to_string(),
            role: ds.role(),
            reason: decision.reason,
        })
    }

    /// Run a statement through every interceptor and then the routing step.
    pub async fn execute(
        &self,
        ctx: &ExecutionContext,
        mut statement: Statement,
    ) -> DbResult<StatementResult> {
        let mut entered = 0;
        let mut vetoed = None;
        for interceptor in &self.interceptors {
            if let Err(e) = interceptor.before_execute(&mut statement, ctx).await {
                vetoed = Some(e);
                break;
            }
            entered += 1;
        }

        let result = match vetoed {
            Some(e) => {
                debug!(error = %e, "Statement vetoed by interceptor");
                Err(e)
            }
            None => self.execute_routed(ctx, &statement).await,
        };

        for interceptor in self.interceptors[..entered].iter().rev() {
            interceptor.after_execute(&statement, &result).await;
        }
        result
    }

    /// Terminal step: bind a routed connection and run the statement on it.
    async fn execute_routed(
        &self,
        ctx: &ExecutionContext,
        statement: &Statement,
    ) -> DbResult<StatementResult> {
        let db = self
            .registry
            .resolve(ctx.database().or(statement.database.as_deref()))?;
        let decision = resolve_role(ctx, &statement.sql, db.is_master_only());

        let mut routed = self.registry.acquire(Some(db.name()), decision.role).await?;
        let span = info_span!(
            "statement",
            database = %routed.database(),
            role = %routed.role(),
            datasource = %routed.datasource(),
        );

        async move {
            debug!(reason = ?decision.reason, "Statement routed");
            let mut result = self.runner.run(routed.connection_mut(), statement).await?;
            result.route = RouteInfo {
                database: routed.database().to_string(),
                datasource: routed.datasource().to_string(),
                role: routed.role(),
            };
            Ok(result)
        }
        .instrument(span)
        .await
    }
}
