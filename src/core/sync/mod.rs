pub mod message_queue;
pub mod ring_buffer;
pub mod shutdown;

pub use message_queue::MessageQueue;
pub use ring_buffer::{BufferMode, ConsumerCursor, ProducerCursor, RingBuffer};
pub use shutdown::ShutdownToken;
