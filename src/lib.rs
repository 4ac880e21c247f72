//! Email notification service for law-firm practice management.
//!
//! Sends deadline reminders and hearing notices to matter-configured
//! recipients, threads outbound mail so replies route back, and processes
//! inbound replies and delivery events from the mail provider.

pub mod config;
pub mod db;
pub mod email;
pub mod error;
pub mod processor;
pub mod scheduler;
pub mod server;

#[cfg(test)]
pub(crate) mod testing;
