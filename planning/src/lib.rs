//! Core of the HTN-learning toolset: first-order terms and formulae, ground
//! states with instantiation search, lifted operator/method/task schemas, the
//! goal-regression learner and the decomposition planner.
//!
//! All symbols and terms are interned in an explicit [`terms::TermTable`]
//! context that is threaded through parsing, learning and search, so that
//! equality on terms and relation symbols is a plain id comparison.

pub mod domain;
pub mod errors;
pub mod formula;
pub mod learning;
pub mod parsing;
pub mod printer;
pub mod problem;
pub mod search;
pub mod state;
pub mod strips;
pub mod substitution;
pub mod terms;
