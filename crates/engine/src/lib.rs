pub mod aggregate;
pub mod builder;
pub mod facade;
pub mod normalize;
pub mod view;

pub use facade::{EngineOptions, TraceQueryFacade};
