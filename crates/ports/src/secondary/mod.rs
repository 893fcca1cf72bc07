pub mod engine_port;
