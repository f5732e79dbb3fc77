pub mod core;
pub mod enrich;
pub mod ledger;
pub mod model;
pub mod pipeline;
pub mod scanner;
pub mod scheduler;
pub mod source;
pub mod store;
