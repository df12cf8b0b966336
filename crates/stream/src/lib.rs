pub mod error;
pub mod listener;
pub mod provider;
pub mod rules;
pub mod supervisor;

pub use error::ProviderError;
pub use listener::{StreamHandle, StreamListener, StreamSummary};
pub use provider::{ByteStream, HttpProvider, ProviderApi, ProviderResponse, StreamResponse};
pub use rules::RuleManager;
pub use supervisor::{ConnectionState, ConnectionSupervisor};
