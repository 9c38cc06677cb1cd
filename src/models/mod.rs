mod commission;
mod entitlement;
mod order;
mod subscription;
mod webhook_event;

pub use commission::*;
pub use entitlement::*;
pub use order::*;
pub use subscription::*;
pub use webhook_event::*;
