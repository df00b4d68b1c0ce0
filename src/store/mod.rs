pub mod lock;
pub mod wiki;
