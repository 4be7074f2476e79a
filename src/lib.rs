pub mod calc;
pub mod calendar;
pub mod config;
pub mod db;
pub mod ipc;
pub mod report;
pub mod telemetry;
