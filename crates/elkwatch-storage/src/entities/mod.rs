pub mod alert;
pub mod data_source;
pub mod rule;
pub mod system_config;
pub mod webhook_channel;
