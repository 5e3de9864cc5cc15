pub mod chair;
pub mod cli;
pub mod clock;
pub mod config;
pub mod keshner;
pub mod messages;
pub mod recording;
pub mod runtime;
pub mod script;
pub mod sequencer;
