use utoipa::OpenApi;
use voice_relay_api::router::ApiDoc;

/// Writes the OpenAPI document for the voice webhook to `openapi.json`.
fn main() -> Result<(), Box<dyn std::error::Error>> {
    let spec_json = ApiDoc::openapi().to_pretty_json()?;
    std::fs::write("openapi.json", spec_json)?;
    Ok(())
}
