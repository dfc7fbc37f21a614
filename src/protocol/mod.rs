//! Wire contract: the JSON frame envelope exchanged over the WebSocket.

pub mod codec;
pub mod frames;

pub use codec::{CodecError, FrameCodec, DEFAULT_MAX_FRAME_BYTES};
pub use frames::{decode_base64_image, ClientFrame, ImageAttachment, ServerFrame, Usage};
