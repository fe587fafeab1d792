mod api;

pub use api::{HealthResponse, IdentityResponse, LoginRequest, LoginResponse};
