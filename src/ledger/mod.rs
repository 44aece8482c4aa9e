pub mod derivation;
pub mod models;
pub mod repository;
pub mod settings;
pub mod store;

#[cfg(test)]
pub mod memory;
