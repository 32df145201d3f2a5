pub mod app;
pub mod debugging;
pub mod hashing;
pub mod timing;
pub mod utils;

#[doc(hidden)]
pub use log; // for debug_panic!
