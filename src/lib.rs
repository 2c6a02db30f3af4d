pub mod calendar;
pub mod config;
pub mod dynamics;
pub mod error;
pub mod gateway;
pub mod hedge;
pub mod model;
pub mod pipeline;
pub mod prompt;
pub mod signal_machine;
pub mod sizing;
pub mod store;
pub mod wrangling;
