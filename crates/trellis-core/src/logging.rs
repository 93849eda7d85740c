//! Logging facilities for Trellis.
//!
//! Trellis uses the `tracing` crate for instrumentation. The library never
//! installs a subscriber; to see logs, install one in your application:
//!
//! ```ignore
//! use tracing_subscriber;
//!
//! fn main() {
//!     // Initialize tracing (you can customize this)
//!     tracing_subscriber::fmt::init();
//!
//!     // Your application code...
//! }
//! ```

/// Target names for log filtering.
///
/// Use these with `tracing` directives to filter logs by subsystem.
pub mod targets {
    /// Core crate target.
    pub const CORE: &str = "trellis_core";
    /// Signal/slot system target.
    pub const SIGNAL: &str = "trellis_core::signal";
    /// Model layer target.
    pub const MODEL: &str = "trellis::model";
    /// Tree store target.
    pub const STORE: &str = "trellis::model::store";
    /// Filter proxy target.
    pub const FILTER: &str = "trellis::model::filter";
}
