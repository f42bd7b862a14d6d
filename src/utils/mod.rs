pub mod errors;
pub mod logport;
pub mod types;
