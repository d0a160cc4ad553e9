pub mod counts;
pub mod library;
