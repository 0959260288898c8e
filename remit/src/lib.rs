pub mod config;
pub mod controller;
