pub mod adapter;
pub mod bindings;
pub mod types;

pub use adapter::ChainAdapter;
