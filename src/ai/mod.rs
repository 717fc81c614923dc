pub mod http_client;
pub mod naming;
pub mod prompts;
pub mod providers;
pub mod recommend;
pub mod vision;

pub use naming::*;
pub use providers::{ProviderEndpoints, ProviderError, ProviderSelection, VisionProvider};
pub use recommend::*;
