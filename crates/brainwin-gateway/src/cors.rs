//! CORS for the single configured frontend origin.

use actix_cors::Cors;
use actix_web::http::header;

/// Credentialed CORS for exactly one origin. Wildcards are rejected when the
/// configuration is loaded.
pub fn build_cors(allowed_origin: &str) -> Cors {
    Cors::default()
        .allowed_origin(allowed_origin)
        .allowed_methods(vec!["GET", "POST", "PUT", "DELETE", "OPTIONS"])
        .allowed_headers(vec![header::AUTHORIZATION, header::CONTENT_TYPE])
        .expose_headers(vec![header::AUTHORIZATION])
        .supports_credentials()
        .max_age(3600)
}
