// Repository ports
// Contracts the domain expects from persistence adapters

pub mod task_repository;

pub use task_repository::TaskRepository;
