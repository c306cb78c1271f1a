pub mod controller;
pub mod pipeline;
pub mod retry;
pub mod state_machine;
