//! AegisGuard HTTP surface
//! Query/command REST routes and the real-time monitor socket

pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod types;
pub mod ws;

pub use handlers::AppState;
pub use middleware::start_cleanup_task;
pub use routes::create_router;
pub use types::*;
