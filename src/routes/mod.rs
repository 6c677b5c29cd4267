pub mod info;
pub mod suite_config;
