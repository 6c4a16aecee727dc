// Infrastructure layer - External dependencies and adapters
pub mod command_channel;
pub mod config;
pub mod http_response;
pub mod ndjson_stream;
pub mod process_supervisor;
pub mod stream_reader;
pub mod wire_codec;
