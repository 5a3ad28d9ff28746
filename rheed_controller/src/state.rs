//! State machine module root.

pub mod machine;

pub use machine::{
    Action, ControllerState, Guards, SecretCheck, Transition, VerifyOutcome, after_fault, step,
};
