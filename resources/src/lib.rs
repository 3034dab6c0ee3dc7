pub mod models;
pub mod objects;
pub mod selector;
pub mod validation;
