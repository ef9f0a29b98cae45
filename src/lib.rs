pub mod config;
pub mod inventory;
pub mod models;
pub mod snmp;
pub mod storage;
pub mod version;
pub mod worker;
