pub mod constraints;
pub mod domain;
