pub mod rules;
pub mod window;
pub mod window_table;

pub use window::{WindowEntry, WindowFlags};
pub use window_table::WindowTable;
