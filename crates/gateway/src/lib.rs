//! The aria-server gateway: WebSocket hub, conversation orchestrator,
//! sentence pipeline, wake-word gate and per-connection service context.

pub mod cancel;
pub mod context;
pub mod history;
pub mod hub;
pub mod live2d;
pub mod pipeline;
pub mod prompts;
pub mod state;
pub mod turn;
pub mod wake;

pub use state::AppState;
