//! Integration tests for lockrace-bot.
//!
//! These tests verify the interaction between components:
//! - Config to composite result through the application
//! - HTTP submissions against a scripted endpoint
//! - Shutdown of a pending pair
#![allow(dead_code)]

pub mod common;
