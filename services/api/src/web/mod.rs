pub mod auth;
pub mod middleware;
pub mod protocol;
pub mod rest;
pub mod state;
pub mod voice;
pub mod ws_handler;

// Re-export the handlers the binary wires into the router.
pub use middleware::require_auth;
pub use rest::{
    get_profile_handler, get_quota_handler, list_history_handler, update_profile_handler,
};
pub use ws_handler::ws_handler;
