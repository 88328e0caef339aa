//! Per-user bots: supervisor and event loop

mod instance;
mod supervisor;

pub use instance::{run_event_loop, BotStats, LoopExit, TickReceiver};
pub use supervisor::BotSupervisor;
