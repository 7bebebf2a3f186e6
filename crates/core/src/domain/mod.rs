pub mod contract;
pub mod market;
pub mod recommendation;
pub mod rules;
pub mod user;
