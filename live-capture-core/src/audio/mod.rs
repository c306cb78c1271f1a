pub mod effect;
pub mod microphone;
