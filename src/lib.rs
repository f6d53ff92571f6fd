pub mod app;
pub mod bruteforcer;
pub mod cli;
pub mod client;
pub mod config;
pub mod detector;
pub mod identity;
pub mod output;
pub mod runner;
pub mod transform;
pub mod utils;

#[cfg(test)]
mod tests;
