pub mod cfg;
pub mod chain;
pub mod engine;
pub mod error;
pub mod path;
pub mod registry;
pub mod relayer;
pub mod store;
