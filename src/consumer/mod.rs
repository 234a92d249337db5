//! Consumer role: buying cadence, offer selection and wallet

pub mod engine;
pub mod round;

pub use engine::ConsumerEngine;
pub use round::{ConsumerRound, RoundState, Wallet};
