pub mod group_api;
pub mod merge_api;
