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

//! BorealDB driver core
//!
//! One native core serving database driver front-ends in multiple guest
//! languages. Thin per-language bridges encode driver calls as wire frames
//! (Thrift compact protocol or Protobuf); this crate decodes them, enforces
//! the driver object model, talks to the warehouse, and hands Arrow results
//! back across the C Data Interface.
//!
//! ## Overview
//!
//! - [`DriverChannel`] - the frame channel a guest bridge writes to and
//!   reads from
//! - [`CoreDispatcher`] - handle validation, lifecycle rules, and routing
//! - [`WarehouseClient`] - the async trait warehouse backends implement
//! - [`handle`] - opaque `{id, magic}` handles, the use-after-free boundary
//! - [`interchange`] - ownership-safe Arrow C Data Interface transfer
//!
//! ## Example
//!
//! ```ignore
//! use borealdb_core::{CoreDispatcher, DriverChannel, WireFormat};
//! use std::sync::Arc;
//!
//! let dispatcher = Arc::new(CoreDispatcher::new(Arc::new(my_client))?);
//! let channel = DriverChannel::new(dispatcher, WireFormat::ThriftCompact);
//! channel.write(&request_frame);
//! channel.flush()?;
//! let mut response = vec![0u8; channel.pending()];
//! channel.read(&mut response);
//! ```
//!
//! ## Configuration Options
//!
//! | Option | Object | Description |
//! |--------|--------|-------------|
//! | `uri` | database | Warehouse endpoint (immutable after init) |
//! | `borealdb.log_level` | database | OFF, ERROR, WARN, INFO, DEBUG, TRACE |
//! | `borealdb.log_file` | database | Log file path (default: stderr) |
//! | `user`, `password`, `token` | connection | Credentials (immutable after init) |
//! | `autocommit` | connection | Transaction mode, defaults to on |
//! | `borealdb.statement.async_exec` | statement | Request asynchronous submission |

pub mod bridge;
pub mod client;
pub mod codec;
pub mod dispatcher;
pub mod error;
pub mod handle;
pub mod interchange;
mod logging;
pub mod options;
pub mod session;
pub mod testing;

// Re-export main types
pub use bridge::{DriverChannel, WireFormat};
pub use dispatcher::CoreDispatcher;
pub use error::{Error, Result, StatusCode};
pub use handle::{Handle, HandleKind};
pub use options::OptionValue;

// Re-export client types for warehouse backend implementations
pub use client::{
    ObjectDepth, ObjectRow, PartitionOutcome, PartitionToken, PreparedInfo, QueryOutcome,
    QueryRequest, SessionConfig, SessionInfo, WarehouseClient,
};
