pub mod catalog;
pub mod error;
pub mod events;
pub mod prompts;

pub use error::{CatalogError, CatalogResult};
