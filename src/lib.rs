pub mod config;
pub mod dispatch;
pub mod hal;
pub mod link;
pub mod messages;
pub mod motor;
pub mod registry;
pub mod runtime;
pub mod sensor;
pub mod sim;
