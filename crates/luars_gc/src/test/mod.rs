pub mod test_finalizer;
pub mod test_incremental;
pub mod test_threads;
