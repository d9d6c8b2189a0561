//! Port traits separating the domain from storage, configuration and reporting.

pub mod config_port;
pub mod raw_data_port;
pub mod derived_port;
pub mod report_port;
