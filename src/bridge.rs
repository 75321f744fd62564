// Copyright (c) 2025 BorealDB Contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The in-process channel guest runtimes drive the core through.
//!
//! A guest bridge writes one encoded request frame, flushes, and reads back
//! one response frame. Flush is the dispatch point: the frame is decoded,
//! validated, executed, and its response queued before flush returns, so a
//! bridge never blocks on `read`.
//!
//! Every failure mode after frame decode is an encoded exception response,
//! never a channel error: unknown methods, malformed bodies, and dispatch
//! failures all come back as `DriverException` frames correlated by
//! sequence number.

use crate::codec::{pb::ProtobufCodec, thrift::ThriftCodec, Response, TransportCodec};
use crate::dispatcher::CoreDispatcher;
use crate::error::{Error, Result};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tracing::trace;

/// Wire encodings a channel can speak.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireFormat {
    ThriftCompact,
    Protobuf,
}

impl WireFormat {
    pub fn codec(self) -> Box<dyn TransportCodec> {
        match self {
            WireFormat::ThriftCompact => Box::new(ThriftCodec::new()),
            WireFormat::Protobuf => Box::new(ProtobufCodec::new()),
        }
    }
}

/// One guest runtime's connection to the dispatcher.
///
/// Channels are cheap; a guest typically opens one per thread or per driver
/// instance. All channels share the dispatcher (and therefore the handle
/// tables and the runtime).
pub struct DriverChannel {
    dispatcher: Arc<CoreDispatcher>,
    codec: Box<dyn TransportCodec>,
    input: Mutex<Vec<u8>>,
    output: Mutex<VecDeque<u8>>,
}

impl DriverChannel {
    pub fn new(dispatcher: Arc<CoreDispatcher>, format: WireFormat) -> Self {
        DriverChannel {
            dispatcher,
            codec: format.codec(),
            input: Mutex::new(Vec::new()),
            output: Mutex::new(VecDeque::new()),
        }
    }

    /// Append request bytes. The frame may arrive in several writes.
    pub fn write(&self, bytes: &[u8]) {
        self.input
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend_from_slice(bytes);
    }

    /// Dispatch the buffered frame and queue its response.
    ///
    /// Fails only when the frame itself cannot be decoded; in that case
    /// nothing is queued and the input buffer is already consumed.
    pub fn flush(&self) -> Result<()> {
        let frame = std::mem::take(&mut *self.input.lock().unwrap_or_else(|e| e.into_inner()));
        let response = self.execute_frame(&frame)?;
        self.output
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend(response);
        Ok(())
    }

    /// Read queued response bytes into `buf`, returning the count.
    pub fn read(&self, buf: &mut [u8]) -> usize {
        let mut output = self.output.lock().unwrap_or_else(|e| e.into_inner());
        let n = buf.len().min(output.len());
        for (i, byte) in output.drain(..n).enumerate() {
            buf[i] = byte;
        }
        n
    }

    /// Bytes currently queued for reading.
    pub fn pending(&self) -> usize {
        self.output.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Process one request frame into one response frame.
    pub fn execute_frame(&self, frame: &[u8]) -> Result<Vec<u8>> {
        let request = self.codec.decode_request(frame)?;
        trace!(method = %request.method, sequence = request.sequence, "dispatching frame");
        let outcome: Result<Response> = match request.call {
            Ok(call) => self.dispatcher.dispatch(call),
            // Unknown method or malformed body: answer with the exception.
            Err(error) => Err(error),
        };
        match self.codec.encode_response(&request.method, request.sequence, &outcome) {
            Ok(frame) => Ok(frame),
            // Encoding a success can fail; the error about it still must
            // reach the guest as a response.
            Err(encode_error) => {
                let fallback: Result<Response> = Err(encode_failure(&encode_error));
                self.codec
                    .encode_response(&request.method, request.sequence, &fallback)
            }
        }
    }
}

fn encode_failure(error: &Error) -> Error {
    Error::unknown().message(format!("failed to encode response: {}", error.message))
}
