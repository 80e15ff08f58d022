// Repository implementations
// Adapters that implement domain repository interfaces

pub mod memory_task_repository;

pub use memory_task_repository::InMemoryTaskRepository;
