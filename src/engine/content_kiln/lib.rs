mod binary;

mod asset_types;
pub use asset_types::*;

mod debounce;
pub use debounce::*;

mod watch;
pub use watch::*;

mod header;
pub use header::*;

mod cache;
pub use cache::*;

mod config;
pub use config::*;

mod registry;
pub use registry::*;

mod session;
pub use session::*;
