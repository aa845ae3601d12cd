pub mod dashboard;
pub mod middleware;
pub mod picks;
pub mod playthroughs;
pub mod rest;
pub mod state;

// Re-export the handlers to make them easily accessible to the binary
// that builds the web server router.
pub use dashboard::dashboard_handler;
pub use middleware::identify_caller;
pub use picks::{decrement_counter_handler, increment_counter_handler, pick_rule_handler};
pub use playthroughs::{
    create_playthrough_handler, end_handler, pause_handler, privacy_handler, resume_handler,
    start_handler, toggle_rule_handler,
};
