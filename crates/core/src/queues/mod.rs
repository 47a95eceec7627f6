pub mod module_inbox;

pub use module_inbox::*;
