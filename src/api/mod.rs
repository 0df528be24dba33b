pub mod client;
pub mod models;

pub use client::MarketplaceClient;
pub use models::{ApiConfig, ResolvedPackage};
