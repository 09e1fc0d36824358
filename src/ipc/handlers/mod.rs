pub mod attendance;
pub mod backup_exchange;
pub mod core;
pub mod permissions;
pub mod settings;
pub mod students;
