pub mod cache;
pub mod memory;
pub mod postgres;
pub mod query;
pub mod sql;
pub mod traits;

pub use cache::*;
pub use memory::*;
pub use postgres::*;
pub use query::*;
pub use traits::*;
