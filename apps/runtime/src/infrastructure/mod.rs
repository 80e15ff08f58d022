// Infrastructure layer module
// Adapters behind the domain ports

pub mod repositories;
