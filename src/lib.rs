pub mod activity;
pub mod api;
pub mod approval;
pub mod client_config;
pub mod connection;
pub mod dispatch;
pub mod errors;
pub mod logging;
pub mod plan;
pub mod protocol;
pub mod run;
pub mod session;
pub mod ui;
pub mod workspace;
