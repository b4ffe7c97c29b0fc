// Adapters behind the ports in app::ports
pub mod http_client;
pub mod in_memory_broker;
pub mod kafka_consumer;
pub mod kafka_producer;
