pub mod backoff;
pub mod parser;
pub mod supervisor;
pub mod transport;

pub use backoff::Backoff;
pub use parser::{parse_frame, Decoded, FrameDecoder, FrameStream, ParseError, RawFrame};
pub use supervisor::{ConnectionState, ReplayCursor, Supervisor};
pub use transport::{ByteStream, HttpTransport, PublishRequest, StreamTransport, TransportError};
