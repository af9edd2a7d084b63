pub mod coordinator;
pub mod permissions;
pub mod room;
