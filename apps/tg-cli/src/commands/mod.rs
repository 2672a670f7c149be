pub mod audit;
pub mod evaluate;
pub mod policy;
pub mod session;
