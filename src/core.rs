pub mod allocator;
pub mod cache;
