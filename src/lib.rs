//! Review Apps - provisions and reconciles a Heroku review app per pull request.
//!
//! One invocation handles one pull request event. An open or synchronize event
//! converges the review app onto the desired state through the step
//! [`orchestrator`]; a close event runs [`teardown`].

pub mod api;
pub mod config;
pub mod error;
pub mod github;
pub mod jobs;
pub mod notify;
pub mod orchestrator;
pub mod platform;
pub mod push;
pub mod steps;
pub mod teardown;
pub mod types;

#[cfg(test)]
mod test_utils;
