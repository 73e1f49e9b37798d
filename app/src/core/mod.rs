pub mod time;
pub mod unit;
