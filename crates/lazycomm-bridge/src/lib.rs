//! lazycomm-bridge: the LZY framing protocol shared by the lazycomm gateway
//! and its worker processes.
//!
//! - **codec**: frame encoding/decoding (blocking and tokio-util)
//! - **message**: request/response types
//! - **worker**: single-shot worker adapter

pub mod codec;
pub mod error;
pub mod logging;
pub mod message;
pub mod worker;

pub use codec::{Frame, FrameCodec, Layout, encode, read_frame, write_frame};
pub use error::{FrameError, Segment};
pub use message::{Fields, METHOD_HEADER, PATH_HEADER, Request, Response, Role};
pub use worker::{
    IncomingRequest, Responder, WorkerError, receive_request, run_worker, serve_once,
};
