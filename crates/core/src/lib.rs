pub mod config;
pub mod error;
pub mod record;
pub mod rule;
pub mod shutdown;

pub use config::Config;
pub use error::*;
pub use record::*;
pub use rule::*;
