pub mod config;
pub mod crawler;
pub mod extractor;
pub mod generator;
pub mod mailer;
pub mod pipeline;
pub mod server;
pub mod storage;
pub mod tracker;
pub mod utils;
