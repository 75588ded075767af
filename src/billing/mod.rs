// src/billing/mod.rs — Per-second call billing

pub mod display;
pub mod handle;
pub mod rate;
pub mod recharge;
pub mod registry;
pub mod session;
pub mod timer;

pub use handle::{CallRequest, PersistOutcome, SessionHandle};
pub use rate::{CallKind, RateTable};
pub use registry::ActiveCalls;
pub use session::{CallSession, CallStatus, PersistBalance, TickResult};
