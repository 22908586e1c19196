pub mod build;
pub mod export;
