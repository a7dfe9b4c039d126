//! API versioning constants.

/// Prefix of all authenticated routes
pub const API_PREFIX: &str = "/api/v0";

/// Path the OpenAPI document is served at
pub const OPENAPI_JSON_PATH: &str = "/api-docs/openapi.json";

/// Path prefix for the local storage backend's signed object URLs
pub const LOCAL_STORAGE_ROUTE: &str = "/storage";
