pub mod app;
pub mod config;
pub mod db;
pub mod encoding;
pub mod geometry;
pub mod naming;
pub mod pipeline;
pub mod source;
