pub mod health;
pub mod diagnostics;
pub mod error;
pub mod messages;
pub mod section;

pub use health::*;
pub use diagnostics::*;
pub use error::*;
pub use messages::*;
pub use section::*;
