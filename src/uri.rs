pub use amq_protocol::uri::*;
