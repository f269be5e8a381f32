pub mod agent;
pub mod api;
pub mod bandwidth;
pub mod config;
pub mod realtime;
pub mod report;
pub mod state;
pub mod telemetry;
