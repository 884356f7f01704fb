//! Worker side of the LZY protocol.
//!
//! A worker process handles exactly one request:
//! 1. decode one request frame from stdin
//! 2. check the reserved `x-path` / `x-method` headers
//! 3. run handler logic with the parsed request
//! 4. write exactly one response frame and flush
//!
//! Any failure aborts the exchange without writing a response. The parent
//! sees the closed channel and the non-zero exit status and decides what to
//! do; nothing is retried here.

pub mod stdio;

use std::io::{self, BufRead, Write};
use std::process::ExitCode;

use bytes::Bytes;

use crate::codec::{read_frame, write_frame};
use crate::error::FrameError;
use crate::message::{Fields, METHOD_HEADER, PATH_HEADER, Request, Response};

/// A decoded request whose reserved headers have been validated.
///
/// `headers` still contains `x-path` and `x-method`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingRequest {
    pub path: String,
    pub method: String,
    pub headers: Fields,
    pub query: Fields,
    pub body: Bytes,
}

impl IncomingRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(String::as_str)
    }
}

impl TryFrom<Request> for IncomingRequest {
    type Error = FrameError;

    fn try_from(request: Request) -> Result<Self, Self::Error> {
        let path = request
            .path()
            .ok_or(FrameError::MissingField(PATH_HEADER))?
            .to_string();
        let method = request
            .method()
            .ok_or(FrameError::MissingField(METHOD_HEADER))?
            .to_string();

        Ok(Self {
            path,
            method,
            headers: request.headers,
            query: request.query,
            body: request.body,
        })
    }
}

/// Decode one request frame and validate its reserved headers.
pub fn receive_request<R: BufRead>(reader: &mut R) -> Result<IncomingRequest, FrameError> {
    let request: Request = read_frame(reader)?;
    let incoming = IncomingRequest::try_from(request)?;
    tracing::debug!(
        path = %incoming.path,
        method = %incoming.method,
        body_bytes = incoming.body.len(),
        "Received request"
    );
    Ok(incoming)
}

/// Writes the single response of an exchange.
pub struct Responder<'a> {
    out: &'a mut dyn Write,
    responded: bool,
}

impl<'a> Responder<'a> {
    pub fn new(out: &'a mut dyn Write) -> Self {
        Self {
            out,
            responded: false,
        }
    }

    /// Encode, write and flush the response frame.
    ///
    /// Fails with `ProtocolViolation` (writing nothing) if a response was
    /// already sent.
    pub fn respond(
        &mut self,
        status: u16,
        headers: Fields,
        body: impl Into<Bytes>,
    ) -> Result<(), FrameError> {
        if self.responded {
            return Err(FrameError::protocol_violation("response already sent"));
        }
        // A failed write leaves the channel in an unknown state, so it counts too.
        self.responded = true;

        let response = Response::new(status, headers, body);
        write_frame(&response, &mut *self.out)?;
        tracing::debug!(status, body_bytes = response.body.len(), "Sent response");
        Ok(())
    }

    pub fn has_responded(&self) -> bool {
        self.responded
    }
}

/// Worker-level failure: the frame exchange or the handler itself.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error("handler failed: {0:#}")]
    Handler(anyhow::Error),
}

/// Run one exchange over the given streams.
///
/// The handler is only invoked for a well-formed request and must call
/// [`Responder::respond`] exactly once.
pub fn serve_once<R, W, H>(mut input: R, mut output: W, handler: H) -> Result<(), WorkerError>
where
    R: BufRead,
    W: Write,
    H: FnOnce(IncomingRequest, &mut Responder<'_>) -> anyhow::Result<()>,
{
    let request = receive_request(&mut input)?;

    let mut responder = Responder::new(&mut output);
    handler(request, &mut responder).map_err(WorkerError::Handler)?;

    if !responder.has_responded() {
        return Err(FrameError::protocol_violation("handler returned without responding").into());
    }
    Ok(())
}

/// Serve the request on this process's stdin/stdout.
///
/// Intended as the body of a worker's `main`. Returns a failure exit code for
/// any error. Errors before the handler responds leave the channel empty; a
/// handler that fails after [`Responder::respond`] has already flushed its
/// frame, and the parent keeps that response despite the exit code.
pub fn run_worker<H>(handler: H) -> ExitCode
where
    H: FnOnce(IncomingRequest, &mut Responder<'_>) -> anyhow::Result<()>,
{
    let channel = match stdio::isolate_stdout() {
        Ok(channel) => channel,
        Err(e) => {
            tracing::error!(error = %e, "Failed to isolate response channel");
            return ExitCode::FAILURE;
        }
    };

    match serve_once(io::stdin().lock(), channel, handler) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Request aborted");
            ExitCode::FAILURE
        }
    }
}
