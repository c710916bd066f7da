pub mod rules;
pub mod screening;
