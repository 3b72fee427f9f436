pub mod auth;
pub mod rate_limit;
pub mod request_id;

pub use auth::{AuthUser, BearerAuth};
pub use rate_limit::RateLimit;
pub use request_id::{request_id_of, RequestId, RequestIdMiddleware};
