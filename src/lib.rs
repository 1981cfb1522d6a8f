//! Flock - A small social network backend
//!
//! Profiles, follows, notifications, password reset by email and chat rooms
//! with a live WebSocket feed, served over a JSON API.

pub mod api;
pub mod config;
pub mod db;
pub mod models;
pub mod services;
