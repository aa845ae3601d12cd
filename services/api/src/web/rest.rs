//! services/api/src/web/rest.rs
//!
//! The master definition for the OpenAPI specification, covering every
//! REST endpoint this service exposes.

use utoipa::OpenApi;

use crate::web::picks::{CounterQuery, PickRuleRequest};
use crate::web::playthroughs::{CreatePlaythroughRequest, PrivacyRequest, ToggleResponse};

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::web::playthroughs::create_playthrough_handler,
        crate::web::playthroughs::start_handler,
        crate::web::playthroughs::pause_handler,
        crate::web::playthroughs::resume_handler,
        crate::web::playthroughs::end_handler,
        crate::web::playthroughs::toggle_rule_handler,
        crate::web::playthroughs::privacy_handler,
        crate::web::picks::pick_rule_handler,
        crate::web::picks::increment_counter_handler,
        crate::web::picks::decrement_counter_handler,
        crate::web::dashboard::dashboard_handler,
    ),
    components(
        schemas(CreatePlaythroughRequest, PrivacyRequest, ToggleResponse, PickRuleRequest, CounterQuery)
    ),
    tags(
        (name = "Challenge Picker API", description = "API endpoints for the playthrough rule engine.")
    )
)]
pub struct ApiDoc;
