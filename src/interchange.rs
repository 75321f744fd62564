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

//! Ownership-safe transfer of Arrow C Data Interface structures across FFI.
//!
//! Every transmitted Arrow struct is an address-sized blob plus an implicit,
//! exclusive transfer of release-callback ownership: exactly one side may
//! ever call release. Exported structs are wrapped in move-only types, so
//! handing a struct across the boundary consumes the wrapper and an export
//! abandoned on an error path is released by `Drop` instead of leaking.
//!
//! Addresses serialize as exactly [`POINTER_BLOB_LEN`] bytes, little-endian,
//! regardless of host byte order. The receiver must not guess.

use crate::error::{Error, Result};
use arrow_array::ffi::{from_ffi, FFI_ArrowArray};
use arrow_array::ffi_stream::{ArrowArrayStreamReader, FFI_ArrowArrayStream};
use arrow_array::{RecordBatch, RecordBatchReader, StructArray};
use arrow_schema::ffi::FFI_ArrowSchema;
use arrow_schema::Schema;

/// Wire width of a transmitted Arrow address: a little-endian u64.
pub const POINTER_BLOB_LEN: usize = 8;

/// Serialize a raw address into its wire blob.
pub fn encode_pointer(addr: u64) -> Vec<u8> {
    addr.to_le_bytes().to_vec()
}

/// Parse a wire blob back into a raw address.
///
/// Rejects blobs of the wrong width and the null address with
/// `INVALID_DATA`.
pub fn decode_pointer(blob: &[u8]) -> Result<u64> {
    let bytes: [u8; POINTER_BLOB_LEN] = blob.try_into().map_err(|_| {
        Error::invalid_data().message(format!(
            "Arrow pointer blob must be {POINTER_BLOB_LEN} bytes, got {}",
            blob.len()
        ))
    })?;
    let addr = u64::from_le_bytes(bytes);
    if addr == 0 {
        return Err(Error::invalid_data().message("Arrow pointer is null"));
    }
    Ok(addr)
}

/// An `ArrowArrayStream` allocated by the core, pending hand-off.
///
/// Move-only: [`StreamExport::into_blob`] consumes the wrapper and transfers
/// release ownership to the caller; if the wrapper is dropped instead (for
/// example when response encoding fails), the stream is released here.
pub struct StreamExport {
    raw: *mut FFI_ArrowArrayStream,
}

impl StreamExport {
    pub fn new(reader: Box<dyn RecordBatchReader + Send>) -> Self {
        let stream = FFI_ArrowArrayStream::new(reader);
        StreamExport {
            raw: Box::into_raw(Box::new(stream)),
        }
    }

    pub fn addr(&self) -> u64 {
        self.raw as u64
    }

    /// Transfer ownership to the caller, yielding the address blob.
    ///
    /// After this call the core never touches the stream again.
    pub fn into_blob(self) -> Vec<u8> {
        let blob = encode_pointer(self.raw as u64);
        std::mem::forget(self);
        blob
    }
}

impl Drop for StreamExport {
    fn drop(&mut self) {
        // Never handed over; reclaim the allocation, which runs release.
        unsafe {
            drop(Box::from_raw(self.raw));
        }
    }
}

/// An `ArrowSchema` allocated by the core, pending hand-off.
pub struct SchemaExport {
    raw: *mut FFI_ArrowSchema,
}

impl SchemaExport {
    pub fn new(schema: &Schema) -> Result<Self> {
        let ffi_schema = FFI_ArrowSchema::try_from(schema)
            .map_err(|e| Error::invalid_data().message(format!("schema not exportable: {e}")))?;
        Ok(SchemaExport {
            raw: Box::into_raw(Box::new(ffi_schema)),
        })
    }

    pub fn addr(&self) -> u64 {
        self.raw as u64
    }

    pub fn into_blob(self) -> Vec<u8> {
        let blob = encode_pointer(self.raw as u64);
        std::mem::forget(self);
        blob
    }
}

impl Drop for SchemaExport {
    fn drop(&mut self) {
        unsafe {
            drop(Box::from_raw(self.raw));
        }
    }
}

/// Import a caller-owned `ArrowArrayStream`.
///
/// The core becomes the consumer and is obligated to call release exactly
/// once, including on error paths: the returned reader (or the intermediate
/// stream, if construction fails) releases on drop.
pub fn import_stream(blob: &[u8]) -> Result<ArrowArrayStreamReader> {
    let addr = decode_pointer(blob)?;
    let stream = unsafe { FFI_ArrowArrayStream::from_raw(addr as *mut FFI_ArrowArrayStream) };
    ArrowArrayStreamReader::try_new(stream)
        .map_err(|e| Error::invalid_data().message(format!("malformed Arrow stream: {e}")))
}

/// Import a caller-owned schema+array pair as one record batch.
///
/// Used by `statementBind`: both structs are moved out of the caller's
/// allocations and released by the core.
pub fn import_batch(schema_blob: &[u8], array_blob: &[u8]) -> Result<RecordBatch> {
    let schema_addr = decode_pointer(schema_blob)?;
    let array_addr = decode_pointer(array_blob)?;
    let schema = unsafe { FFI_ArrowSchema::from_raw(schema_addr as *mut FFI_ArrowSchema) };
    let array = unsafe { FFI_ArrowArray::from_raw(array_addr as *mut FFI_ArrowArray) };
    let data = unsafe { from_ffi(array, &schema) }
        .map_err(|e| Error::invalid_data().message(format!("malformed Arrow array: {e}")))?;
    Ok(RecordBatch::from(StructArray::from(data)))
}
