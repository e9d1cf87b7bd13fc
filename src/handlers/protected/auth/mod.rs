pub mod session;

// Re-export handler functions for use in routing
pub use session::logout;
pub use session::whoami;
