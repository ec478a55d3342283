//! Skill creation stages, leaf to root: ranker, materializer, integrator,
//! scanner, fixer, and the creator that drives them in order.

pub mod creator;
pub mod fixer;
pub mod integrator;
pub mod materializer;
pub mod ranker;
pub mod scanner;
