// Declare the modules to re-export
pub mod limiter;
pub mod sri;
pub mod viewport;

// Re-export everything
pub use limiter::*;
pub use sri::*;
pub use viewport::*;
