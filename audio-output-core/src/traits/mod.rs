pub mod backend_factory;
pub mod device_backend;
