mod common;
mod database_tests;
mod item_cache_tests;
