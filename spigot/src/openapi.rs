//! OpenAPI document assembly. Served at `/api-docs/openapi.json` and
//! rendered at `/docs`.

use utoipa::openapi::security::{ApiKey, ApiKeyValue, SecurityScheme};
use utoipa::{Modify, OpenApi};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "spigot",
        description = "Stored operations published as secret-gated HTTP endpoints"
    ),
    paths(
        crate::api::handlers::dispatch::dispatch_root,
        crate::api::handlers::dispatch::dispatch_trailing,
    ),
    components(schemas(
        crate::api::models::DispatchSuccess,
        crate::api::models::DispatchMetadata,
        crate::api::models::DispatchFailure,
    )),
    modifiers(&SecurityAddon),
    tags((name = "dispatch", description = "Invoke published endpoints"))
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme("api_key", SecurityScheme::ApiKey(ApiKey::Header(ApiKeyValue::new("X-API-Key"))));
    }
}
