pub mod decoder;
pub mod listener;
pub mod socket;

pub use listener::open_listener;
