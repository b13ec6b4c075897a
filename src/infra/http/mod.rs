//! Demo HTTP surface: public routes exercising each cache policy and an admin
//! router for invalidation.

mod admin;
mod middleware;
mod public;

pub use admin::{AdminState, build_admin_router};
pub use middleware::log_responses;
pub use public::{DemoState, build_router, culture_from_headers, with_demo_profiles};
