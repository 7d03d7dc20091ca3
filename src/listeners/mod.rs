pub mod client_broadcast;
pub mod client_hub;
