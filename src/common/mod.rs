pub mod entity_cache;
pub mod event_broadcaster;
pub mod operation_queue;
