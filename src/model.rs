mod app_config;
mod group;
mod proxy;

pub use app_config::*;
pub use group::{Group, INLINE_PREFIX, SubscriptionEntry, SubscriptionPatch};
pub use proxy::ProxyRecord;
