pub mod connection;
pub mod sanitize;
pub mod schema;

pub use connection::Store;
