//! Behavioural tests for the protocol engine.

mod engine_behaviour;
mod support;
