use crate::schema::get_current_schema;
use axum::{http::Uri, Json};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct WhoAmIResponse {
    pub path: String,
    pub schema: String,
    pub domain: Option<String>,
    pub folder: Option<String>,
}

/// Echoes the schema the routing layer activated for this request.
pub async fn whoami(uri: Uri) -> Json<WhoAmIResponse> {
    let schema = get_current_schema();

    Json(WhoAmIResponse {
        path: uri.path().to_string(),
        schema: schema.schema_name().to_string(),
        domain: schema.domain_url().map(str::to_string),
        folder: schema.folder().map(str::to_string),
    })
}
