//! Deferred feeling feedback
//!
//! Meals are followed up some time after they are logged with a prompt
//! asking how the user feels. The scheduler owns those prompts.

pub mod scheduler;

pub use scheduler::{FeedbackEntry, FeedbackState, FeelingRequest, FeelingScheduler};
