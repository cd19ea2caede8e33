mod client;
mod token;
mod types;

pub use client::VertexClient;
pub use types::VertexConfig;
pub use types::{DEFAULT_LANGUAGE, DEFAULT_LOCATION, DEFAULT_MODEL};
