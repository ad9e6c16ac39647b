pub mod config_store;
pub mod energy;
pub mod tsdb;
