mod manager;

pub use manager::{search_path, table_exists, PoolManager};
