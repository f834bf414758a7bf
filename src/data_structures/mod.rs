pub mod record_pool;
