//! Translates a rule record into engine artifacts: the plain view over the
//! user predicate, the throttled materialized view writing alert state, and
//! the optional resolver materialized view.
//!
//! DDL ordering matters: the target acks stream must exist before the MVs
//! that write into it, and the plain view before anything that reads it.
//! There is no transactional DDL, so every start begins with a force-drop of
//! whatever a previous attempt may have left behind.

use std::sync::Arc;

use domain::engine::entity as rows;
use domain::engine::error::EngineError;
use domain::rule::entity::Rule;
use domain::rule::error::RuleError;
use domain::schema::catalog;
use ports::secondary::engine_port::EnginePort;

use crate::retry::{retry_with_backoff, RetryConfig};

/// Column names tried, in order, when the rule does not name usable
/// entity-id columns itself.
pub const ENTITY_PRIORITY_COLUMNS: [&str; 6] =
    ["entity_id", "device_id", "id", "host", "ip", "user_id"];

/// Outcome of a successful compilation.
#[derive(Debug)]
pub struct CompiledRule {
    /// Column the alerts are keyed on.
    pub entity_column: String,
    /// Acknowledgment stream the materialized views write into.
    pub acks_stream: String,
}

enum EntityResolution {
    /// Use an existing output column directly.
    Existing(String),
    /// Rewrite the view adding `<expr> AS entity_id`.
    Synthesized(String),
}

pub struct RuleCompiler {
    engine: Arc<dyn EnginePort>,
    retry: RetryConfig,
}

impl RuleCompiler {
    pub fn new(engine: Arc<dyn EnginePort>) -> Self {
        Self {
            engine,
            retry: RetryConfig::default(),
        }
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Run the full DDL plan for a rule. On failure, partial artifacts are
    /// dropped before the error is surfaced; the rule record is untouched
    /// (status bookkeeping belongs to the lifecycle manager).
    pub async fn compile(&self, rule: &Rule) -> Result<CompiledRule, RuleError> {
        let target = rule.acks_stream();
        if rule.uses_dedicated_acks_stream() {
            self.engine
                .ensure_mutable_stream(
                    &target,
                    &catalog::alert_acks_columns(),
                    &["rule_id", "entity_id"],
                )
                .await
                .map_err(|e| {
                    RuleError::Compile(format!("failed to ensure acks stream {target}: {e}"))
                })?;
        }

        self.force_drop_artifacts(rule).await;

        match self.build_artifacts(rule, &target).await {
            Ok(entity_column) => Ok(CompiledRule {
                entity_column,
                acks_stream: target,
            }),
            Err(e) => {
                self.force_drop_artifacts(rule).await;
                Err(e)
            }
        }
    }

    /// Drop every artifact name the rule can own, each tried as both a plain
    /// and a materialized view. Errors are ignored: a missing artifact is
    /// the normal case.
    pub async fn force_drop_artifacts(&self, rule: &Rule) {
        let resolve_view = rule
            .resolve_view_name
            .clone()
            .unwrap_or_else(|| format!("rule_{}_resolve_view", rule.sanitized_id()));
        let names = [
            rule.view_name.clone(),
            rule.mv_name(),
            resolve_view,
            rule.resolve_mv_name(),
        ];
        for name in names {
            if let Err(e) = self.engine.execute_ddl(&catalog::drop_view_ddl(&name)).await {
                tracing::debug!(artifact = %name, error = %e, "drop view failed");
            }
            if let Err(e) = self
                .engine
                .execute_ddl(&catalog::drop_materialized_view_ddl(&name))
                .await
            {
                tracing::debug!(artifact = %name, error = %e, "drop materialized view failed");
            }
        }
    }

    async fn build_artifacts(&self, rule: &Rule, target: &str) -> Result<String, RuleError> {
        self.create_view_with_retry(catalog::plain_view_ddl(&rule.view_name, &rule.query))
            .await
            .map_err(|e| RuleError::Compile(format!("failed to create plain view: {e}")))?;

        if let (Some(resolve_query), Some(resolve_view)) =
            (&rule.resolve_query, &rule.resolve_view_name)
        {
            self.create_view_with_retry(catalog::plain_view_ddl(resolve_view, resolve_query))
                .await
                .map_err(|e| RuleError::Compile(format!("failed to create resolve view: {e}")))?;
        }

        let columns = self
            .describe(&rule.view_name)
            .await
            .map_err(|e| RuleError::Compile(format!("failed to describe view: {e}")))?;

        let entity_column = match resolve_entity_column(rule, &columns) {
            EntityResolution::Existing(name) => name,
            EntityResolution::Synthesized(expr) => {
                self.rewrite_with_entity(&rule.view_name, &rule.query, &expr)
                    .await
                    .map_err(|e| {
                        RuleError::Compile(format!("failed to rewrite view with entity id: {e}"))
                    })?;
                if let (Some(resolve_query), Some(resolve_view)) =
                    (&rule.resolve_query, &rule.resolve_view_name)
                {
                    self.rewrite_with_entity(resolve_view, resolve_query, &expr)
                        .await
                        .map_err(|e| {
                            RuleError::Compile(format!(
                                "failed to rewrite resolve view with entity id: {e}"
                            ))
                        })?;
                }
                "entity_id".to_string()
            }
        };
        tracing::info!(rule_id = %rule.id, column = %entity_column, "resolved entity id column");

        if rule.resolve_query.is_some() {
            if let Some(resolve_view) = &rule.resolve_view_name {
                let resolve_columns = self
                    .describe(resolve_view)
                    .await
                    .map_err(|e| RuleError::Compile(format!("failed to describe resolve view: {e}")))?;
                if !resolve_columns.iter().any(|(name, _)| *name == entity_column) {
                    return Err(RuleError::Compile(format!(
                        "resolve query does not expose entity id column '{entity_column}'"
                    )));
                }
            }
        }

        let data_columns: Vec<String> = columns
            .iter()
            .filter(|(name, _)| {
                !name.is_empty()
                    && !catalog::INTERNAL_COLUMNS.contains(&name.as_str())
                    && *name != entity_column
            })
            .map(|(name, _)| name.clone())
            .collect();
        let data_expr = catalog::triggering_data_expr(&data_columns);

        let mv_name = rule.mv_name();
        let mv_ddl = catalog::throttled_mv_ddl(
            &rule.id,
            &mv_name,
            &rule.view_name,
            target,
            &entity_column,
            rule.throttle_minutes,
            &data_expr,
        );
        self.create_mv_with_retry(&mv_name, mv_ddl)
            .await
            .map_err(|e| {
                RuleError::Compile(format!("failed to create throttled materialized view: {e}"))
            })?;

        if rule.resolve_query.is_some() {
            if let Some(resolve_view) = &rule.resolve_view_name {
                let resolve_mv = rule.resolve_mv_name();
                let ddl = catalog::resolver_mv_ddl(
                    &rule.id,
                    &resolve_mv,
                    resolve_view,
                    target,
                    &entity_column,
                );
                self.create_mv_with_retry(&resolve_mv, ddl).await.map_err(|e| {
                    RuleError::Compile(format!("failed to create resolver materialized view: {e}"))
                })?;
            }
        }

        Ok(entity_column)
    }

    async fn create_view_with_retry(&self, ddl: String) -> Result<(), EngineError> {
        let engine = Arc::clone(&self.engine);
        retry_with_backoff(&self.retry, move || {
            let engine = Arc::clone(&engine);
            let ddl = ddl.clone();
            async move { engine.execute_ddl(&ddl).await }
        })
        .await
    }

    async fn create_mv_with_retry(&self, name: &str, ddl: String) -> Result<(), EngineError> {
        let engine = Arc::clone(&self.engine);
        let name = name.to_string();
        retry_with_backoff(&self.retry, move || {
            let engine = Arc::clone(&engine);
            let name = name.clone();
            let ddl = ddl.clone();
            async move { engine.create_materialized_view(&name, &ddl).await }
        })
        .await
    }

    /// Output columns of a view as `(name, type)` pairs, in declaration order.
    async fn describe(&self, view: &str) -> Result<Vec<(String, String)>, EngineError> {
        let result = self.engine.query(&format!("DESCRIBE {view}")).await?;
        Ok(result
            .iter()
            .map(|row| (rows::get_string(row, "name"), rows::get_string(row, "type")))
            .collect())
    }

    async fn rewrite_with_entity(
        &self,
        view: &str,
        query: &str,
        entity_expr: &str,
    ) -> Result<(), EngineError> {
        if let Err(e) = self.engine.execute_ddl(&catalog::drop_view_ddl(view)).await {
            tracing::warn!(view = %view, error = %e, "drop before entity rewrite failed");
        }
        self.engine
            .execute_ddl(&catalog::entity_view_ddl(view, query, entity_expr))
            .await
    }
}

fn resolve_entity_column(rule: &Rule, columns: &[(String, String)]) -> EntityResolution {
    // 1. Columns the user asked for, intersected with what the view exposes.
    if !rule.entity_id_columns.is_empty() {
        let requested: Vec<&str> = rule
            .entity_id_columns
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect();
        let mut found: Vec<String> = Vec::new();
        for (name, _) in columns {
            if requested.iter().any(|r| r == name) {
                found.push(name.clone());
            }
        }
        match found.len() {
            0 => {
                tracing::warn!(
                    rule_id = %rule.id,
                    requested = %rule.entity_id_columns,
                    "none of the requested entity id columns exist in the view"
                );
            }
            1 => return EntityResolution::Existing(found.remove(0)),
            _ => return EntityResolution::Synthesized(catalog::concat_entity_expr(&found)),
        }
    }

    // 2. Well-known identifier columns.
    for priority in ENTITY_PRIORITY_COLUMNS {
        if columns.iter().any(|(name, _)| name == priority) {
            return EntityResolution::Existing(priority.to_string());
        }
    }

    // 3. First string-typed column.
    if let Some((name, _)) = columns.iter().find(|(_, ty)| ty.contains("string")) {
        return EntityResolution::Existing(name.clone());
    }

    // 4. Synthesize a stable hash of the event time.
    EntityResolution::Synthesized(catalog::HASHED_ENTITY_EXPR.to_string())
}
