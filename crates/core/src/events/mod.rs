pub mod bus;
pub mod bus_builder;
pub mod event;
pub mod storage;

pub use bus::*;
pub use bus_builder::*;
pub use event::*;
