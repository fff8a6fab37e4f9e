pub mod db;
pub mod query;
pub mod remote;
pub mod schema;
pub mod write;

pub use db::Store;
pub use remote::HttpTraceStore;
