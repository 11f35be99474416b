pub mod connection_state;
pub mod notification;
pub mod subscription;
