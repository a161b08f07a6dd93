pub mod aggregator;
pub mod document;
pub mod grouper;
pub mod merger;
pub mod registry;
pub mod store;
