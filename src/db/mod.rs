pub mod dbcolab;
pub mod memstore;
pub mod store;
