pub mod build_info;
pub mod classify;
pub mod commands;
pub mod config;
pub mod dest;
pub mod error;
pub mod history;
pub mod identity;
pub mod markup;
pub mod migrate;
pub mod model;
pub mod output;
pub mod source;
pub mod store;

#[cfg(test)]
mod testing;
