pub mod editors;
pub mod panels;
pub mod plot;
