pub mod nodejs;
pub mod python;
