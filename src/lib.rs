//! # Borderify Telegram Bot
//!
//! A Telegram bot that puts uploaded pictures on a solid background canvas
//! with the aspect ratio and margin the user picks through a short dialogue.

pub mod bot;
pub mod compositor;
pub mod config;
pub mod conversation;
pub mod dialogue;
pub mod errors;
pub mod events;
pub mod image_store;
pub mod localization;
pub mod session_store;
