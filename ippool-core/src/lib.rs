pub mod allocator;
pub mod config;
pub mod ip;
pub mod kubernetes;
pub mod resources;
pub mod store;

pub const FIELD_MANAGER: &str = "ippool";
