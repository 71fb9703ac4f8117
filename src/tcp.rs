pub use amq_protocol::tcp::*;
