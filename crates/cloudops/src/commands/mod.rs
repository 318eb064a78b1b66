pub mod bucket;
pub mod function;
pub mod instance;
pub mod object;
