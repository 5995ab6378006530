pub mod flow_buffer;

pub use flow_buffer::FlowBuffer;
