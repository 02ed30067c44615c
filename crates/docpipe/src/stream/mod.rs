//! Progress stream codec: frames, encoder, incremental decoder and consumer.

pub mod consumer;
pub mod decoder;
pub mod encoder;
pub mod frame;

pub use consumer::{ConsumerState, MemorySample, StreamConsumer, StreamEvent, StreamEvents};
pub use decoder::{scan, FrameDecoder};
pub use encoder::{encode, FrameEncoder};
pub use frame::{ErrorFrame, ProgressFrame, ResultFrame, StreamFrame};
