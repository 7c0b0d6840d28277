pub mod config;
pub mod error;
pub mod quota;
pub mod record;

pub use config::Config;
pub use error::*;
pub use quota::QuotaSpec;
pub use record::*;
