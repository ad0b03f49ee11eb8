pub mod events;
pub mod presentation;
pub mod protocol;
pub mod submission;
