//! 认知层：ReasonPlanner、Observer、Synthesizer、动作与过程事件

pub mod action;
pub mod events;
pub mod observer;
pub mod planner;
pub mod prompts;
pub mod synthesizer;

pub use action::{ActionResult, ActionTag};
pub use events::{replay_steps, ReactEvent};
pub use observer::{parse_observation, Observer};
pub use planner::{Confidence, Plan, ReasonPlanner};
pub use synthesizer::{Synthesizer, DEGRADED_MESSAGE};
