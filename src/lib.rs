pub mod app;
pub mod cli;
pub mod config;
pub mod db;
pub mod errors;
pub mod identity;
pub mod notices;
pub mod paths;
pub mod propagation;
pub mod state;
pub mod sync;

#[cfg(test)]
mod testing;
