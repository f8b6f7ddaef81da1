pub mod scaling;
pub mod worker;
