pub mod contracts;
pub mod error;
pub mod history;
pub mod query;
pub mod read_state;
pub mod session;
pub mod store;
