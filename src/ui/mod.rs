pub mod icons;
pub mod output;
pub mod table;
pub mod theme;

pub use icons::Icons;
pub use output::{change, dim, error, header, info, success};
pub use table::{TableBuilder, rows_table};
pub use theme::{theme, Theme};
