pub mod accumulator;
pub mod clock;
pub mod db;
pub mod domain;
pub mod error;
pub mod reset;
pub mod rollup;
pub mod tenant;

pub use clock::{Clock, ManualClock, SystemClock};
pub use db::TenantStore;
pub use error::Error;
pub use tenant::{TenantId, TenantResolver};
