use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use rtcrpc_frame::MetadataMap;

use crate::error::{PeerError, Result};
use crate::stream::ClientStream;
use crate::transport::MethodDescriptor;

/// Content type sent with every call.
pub const GRPC_CONTENT_TYPE: &str = "application/grpc";

/// One typed call over a [`ClientStream`].
///
/// Enforces the call-shape rules the stream itself does not: start once,
/// send only between start and finish, a single request message unless the
/// method streams requests, finish and close once.
#[derive(Debug)]
pub struct Call {
    stream: Arc<ClientStream>,
    method: MethodDescriptor,
    started: bool,
    closed: bool,
    finished_sending: bool,
    sent_first_message: bool,
}

impl Call {
    pub fn new(stream: Arc<ClientStream>, method: MethodDescriptor) -> Self {
        Self {
            stream,
            method,
            started: false,
            closed: false,
            finished_sending: false,
            sent_first_message: false,
        }
    }

    pub fn stream(&self) -> &Arc<ClientStream> {
        &self.stream
    }

    pub fn method(&self) -> &MethodDescriptor {
        &self.method
    }

    pub fn start(&mut self, metadata: &MetadataMap, timeout: Option<Duration>) -> Result<()> {
        if self.started {
            return Err(invalid("call already started - cannot start"));
        }
        self.started = true;

        let mut request_metadata = metadata.clone();
        request_metadata.insert("content-type", GRPC_CONTENT_TYPE);
        self.stream
            .start(&self.method.path(), &request_metadata, timeout);
        Ok(())
    }

    pub fn send(&mut self, message: Bytes) -> Result<()> {
        if !self.started {
            return Err(invalid("call not started - start must be called before send"));
        }
        if self.closed {
            return Err(invalid("call already closed - cannot send"));
        }
        if self.finished_sending {
            return Err(invalid("call already finished sending - cannot send"));
        }
        if !self.method.kind.client_streams() && self.sent_first_message {
            return Err(invalid(
                "message already sent for non-client-streaming method - cannot send",
            ));
        }
        self.sent_first_message = true;
        self.stream.send_message(Some(message));
        Ok(())
    }

    pub fn finish_send(&mut self) -> Result<()> {
        if !self.started {
            return Err(invalid(
                "call not started - start must be called before finish_send",
            ));
        }
        if self.closed {
            return Err(invalid("call already closed - cannot finish_send"));
        }
        if self.finished_sending {
            return Err(invalid("call already finished sending - cannot finish_send"));
        }
        self.finished_sending = true;
        self.stream.finish_send(self.method.kind);
        Ok(())
    }

    /// Cancel the call, sending a reset.
    pub fn close(&mut self) -> Result<()> {
        if !self.started {
            return Err(invalid("call not started - start must be called before close"));
        }
        if self.closed {
            return Err(invalid("call already closed - cannot close"));
        }
        self.closed = true;
        self.stream.cancel();
        Ok(())
    }
}

fn invalid(message: &str) -> PeerError {
    PeerError::InvalidState(message.to_string())
}
