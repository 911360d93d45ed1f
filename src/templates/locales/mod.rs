// Built-in prompt locales, one module per language

pub mod ar;
pub mod en;
