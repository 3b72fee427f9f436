pub mod geoip;
pub mod link_service;
pub mod rate_limit;
pub mod redirect;

pub use link_service::{CreateLinkRequest, LinkService};
pub use rate_limit::{RateLimitDecision, RateLimiter};
pub use redirect::{CacheTier, RedirectService, Resolved};
