pub mod document;
pub mod role;
pub mod sensitivity;
