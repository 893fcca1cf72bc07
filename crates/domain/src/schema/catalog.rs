//! Pure SQL-text generation for every engine artifact the gateway owns:
//! the rules catalog, the acknowledgment streams, and the per-rule views
//! and materialized views. No I/O happens here.

use crate::alert::entity::AlertState;
use crate::engine::entity::Column;
use crate::schema::sql;

/// Mutable stream holding the rule catalog, keyed by rule id.
pub const RULES_STREAM: &str = "tp_rules";

/// Shared mutable stream holding alert acknowledgment state, keyed by
/// `(rule_id, entity_id)`.
pub const ALERT_ACKS_STREAM: &str = "tp_alert_acks_mutable";

/// Columns the engine maintains itself; never captured into alert comments.
pub const INTERNAL_COLUMNS: [&str; 2] = ["_tp_time", "_tp_sn"];

/// Fallback entity-id expression when a view exposes no usable column:
/// a stable hash of the event time.
pub const HASHED_ENTITY_EXPR: &str = "lower(hex(md5(toString(_tp_time))))";

pub fn rules_stream_columns() -> Vec<Column> {
    vec![
        Column::new("id", "string"),
        Column::new("name", "string"),
        Column::new("description", "string"),
        Column::new("query", "string"),
        Column::nullable("resolve_query", "string"),
        Column::new("status", "string"),
        Column::new("severity", "string"),
        Column::new("throttle_minutes", "int32"),
        Column::new("entity_id_columns", "string"),
        Column::new("created_at", "datetime64(3)"),
        Column::new("updated_at", "datetime64(3)"),
        Column::nullable("last_triggered_at", "datetime64(3)"),
        Column::new("result_stream", "string"),
        Column::new("view_name", "string"),
        Column::nullable("resolve_view_name", "string"),
        Column::nullable("last_error", "string"),
        Column::nullable("dedicated_alert_acks_stream", "bool"),
        Column::nullable("alert_acks_stream_name", "string"),
        Column::new("active", "bool"),
    ]
}

pub fn alert_acks_columns() -> Vec<Column> {
    vec![
        Column::new("rule_id", "string"),
        Column::new("entity_id", "string"),
        Column::new("state", "string"),
        Column::new("created_at", "datetime64(3)"),
        Column::new("updated_at", "datetime64(3)"),
        Column::nullable("updated_by", "string"),
        Column::nullable("comment", "string"),
    ]
}

fn column_defs(columns: &[Column]) -> String {
    columns
        .iter()
        .map(|c| {
            let null = if c.nullable { " NULL" } else { "" };
            format!("{} {}{null}", sql::ident(&c.name), c.data_type)
        })
        .collect::<Vec<_>>()
        .join(", ")
}

pub fn create_stream_ddl(name: &str, columns: &[Column]) -> String {
    format!(
        "CREATE STREAM IF NOT EXISTS {} ({})",
        sql::ident(name),
        column_defs(columns)
    )
}

pub fn create_mutable_stream_ddl(name: &str, columns: &[Column], primary_key: &[&str]) -> String {
    let pk = primary_key
        .iter()
        .map(|k| sql::ident(k))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "CREATE MUTABLE STREAM {} ({}) PRIMARY KEY ({pk})",
        sql::ident(name),
        column_defs(columns)
    )
}

pub fn drop_stream_ddl(name: &str) -> String {
    format!("DROP STREAM IF EXISTS {}", sql::ident(name))
}

pub fn drop_view_ddl(name: &str) -> String {
    format!("DROP VIEW IF EXISTS {name}")
}

pub fn drop_materialized_view_ddl(name: &str) -> String {
    format!("DROP MATERIALIZED VIEW IF EXISTS {name}")
}

/// Plain view over the user predicate. Stateless; re-evaluated per read.
pub fn plain_view_ddl(view_name: &str, query: &str) -> String {
    format!("CREATE VIEW {view_name} AS {query}")
}

/// Plain view extended with a synthesized `entity_id` column.
pub fn entity_view_ddl(view_name: &str, query: &str, entity_expr: &str) -> String {
    format!("CREATE VIEW {view_name} AS SELECT *, {entity_expr} AS entity_id FROM ({query})")
}

/// `concat(col1, '_', col2, …)` over the matched entity-id columns.
pub fn concat_entity_expr(columns: &[String]) -> String {
    let mut parts = Vec::with_capacity(columns.len() * 2);
    for col in columns {
        if !parts.is_empty() {
            parts.push("'_'".to_string());
        }
        parts.push(col.clone());
    }
    format!("concat({})", parts.join(", "))
}

/// Throttle predicate over the aliased ack columns of the join.
///
/// Negative minutes: fire only when no prior record exists for the key;
/// an acknowledgment does not re-enable triggering in this mode.
pub fn throttle_condition(throttle_minutes: i32) -> String {
    if throttle_minutes < 0 {
        return "ack_state = ''".to_string();
    }
    format!(
        "ack_state = '' OR ack_state = '{}' OR now() - {throttle_minutes}m > ack.created_at",
        AlertState::Acknowledged
    )
}

/// SQL expression producing a JSON object string of the triggering row.
///
/// `columns` must already exclude engine-internal columns and the entity-id
/// column; with nothing left the expression is the literal `'{}'`.
pub fn triggering_data_expr(columns: &[String]) -> String {
    if columns.is_empty() {
        return "'{}'".to_string();
    }
    let parts = columns
        .iter()
        .map(|c| format!("concat('\"{c}\": \"', to_string(`{c}`), '\"')"))
        .collect::<Vec<_>>()
        .join(", ");
    format!("concat('{{', array_string_concat([{parts}], ', '), '}}')")
}

/// Materialized view implementing the alert state machine for one rule.
///
/// The left join against the target acks stream encodes throttling: an
/// existing `active` row inside the window suppresses re-fires, an
/// `acknowledged` row allows one immediate re-fire, and a stale `active`
/// row outside the window re-fires while `coalesce` carries the original
/// episode `created_at` forward. The primary-key upsert of the destination
/// makes each emitted row a state transition to `active`.
pub fn throttled_mv_ddl(
    rule_id: &str,
    mv_name: &str,
    view_name: &str,
    target_stream: &str,
    entity_column: &str,
    throttle_minutes: i32,
    data_expr: &str,
) -> String {
    let rule_lit = sql::quote(rule_id);
    let condition = throttle_condition(throttle_minutes);
    format!(
        "CREATE MATERIALIZED VIEW {mv_name} INTO {target_stream} AS\n\
         WITH filtered_events AS (\n\
         \x20   SELECT\n\
         \x20       view.*,\n\
         \x20       ack.state AS ack_state,\n\
         \x20       ack.created_at AS ack_created_at\n\
         \x20   FROM {view_name} AS view\n\
         \x20   LEFT JOIN {target_stream} AS ack ON view.{entity_column} = ack.entity_id\n\
         \x20   WHERE (ack.rule_id = '') OR (ack.rule_id = {rule_lit} AND ({condition}))\n\
         )\n\
         SELECT\n\
         \x20   {rule_lit} AS rule_id,\n\
         \x20   fe.{entity_column} AS entity_id,\n\
         \x20   '{active}' AS state,\n\
         \x20   coalesce(fe.ack_created_at, now()) AS created_at,\n\
         \x20   now() AS updated_at,\n\
         \x20   '' AS updated_by,\n\
         \x20   {data_expr} AS comment\n\
         FROM filtered_events AS fe",
        active = AlertState::Active,
    )
}

/// Materialized view that auto-resolves alerts when the resolve predicate
/// matches: writes an `acknowledged` row for the entity, which the throttle
/// predicate then treats as permission for the next re-fire.
pub fn resolver_mv_ddl(
    rule_id: &str,
    mv_name: &str,
    resolve_view_name: &str,
    target_stream: &str,
    entity_column: &str,
) -> String {
    format!(
        "CREATE MATERIALIZED VIEW {mv_name} INTO {target_stream} AS\n\
         SELECT\n\
         \x20   {rule_lit} AS rule_id,\n\
         \x20   {entity_column} AS entity_id,\n\
         \x20   '{acknowledged}' AS state,\n\
         \x20   now() AS created_at,\n\
         \x20   now() AS updated_at,\n\
         \x20   'auto-resolver' AS updated_by,\n\
         \x20   '{{\"reason\":\"Auto-resolved by resolve query\"}}' AS comment\n\
         FROM {resolve_view_name}",
        rule_lit = sql::quote(rule_id),
        acknowledged = AlertState::Acknowledged,
    )
}
