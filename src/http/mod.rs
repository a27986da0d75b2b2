//! HTTP front end for admission decisions.

mod handler;
mod server;

pub use handler::{router, AppState, UNKNOWN_IDENTITY};
pub use server::serve_with_shutdown;
