pub mod clock;
pub mod scope_guard;
