//! Reading domain: models, store contract, mutation service.

mod reading_model;
mod reading_service;
mod reading_store;

pub use reading_model::*;
pub use reading_service::*;
pub use reading_store::*;
