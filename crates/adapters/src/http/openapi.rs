use utoipa::OpenApi;

use super::alerts_handler::{
    AcknowledgeBody, AlertDataResponse, AlertResponse,
};
use super::error::{ErrorBody, ErrorDetail};
use super::health_handler::HealthResponse;
use super::rules_handler::{CreateRuleBody, MessageResponse, RuleResponse, UpdateRuleBody};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Alert Gateway API",
        description = "Rules over streaming SQL predicates, with throttled \
                       alerting, acknowledgment, and auto-resolution."
    ),
    paths(
        super::rules_handler::list_rules,
        super::rules_handler::get_rule,
        super::rules_handler::create_rule,
        super::rules_handler::update_rule,
        super::rules_handler::delete_rule,
        super::rules_handler::start_rule,
        super::rules_handler::stop_rule,
        super::rules_handler::rule_alerts,
        super::alerts_handler::list_alerts,
        super::alerts_handler::alerts_by_time,
        super::alerts_handler::get_alert,
        super::alerts_handler::alert_data,
        super::alerts_handler::acknowledge_alert,
        super::health_handler::healthz,
        super::health_handler::readyz,
    ),
    components(schemas(
        CreateRuleBody,
        UpdateRuleBody,
        RuleResponse,
        MessageResponse,
        AlertResponse,
        AlertDataResponse,
        AcknowledgeBody,
        HealthResponse,
        ErrorBody,
        ErrorDetail,
    )),
    tags(
        (name = "Rules", description = "Rule lifecycle management"),
        (name = "Alerts", description = "Alert queries and acknowledgment"),
        (name = "Health", description = "Probes"),
    )
)]
pub struct ApiDoc;
