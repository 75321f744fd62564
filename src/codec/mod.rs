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

//! Wire codecs and the canonical request model.
//!
//! Two interchangeable encodings carry the same RPC surface: Thrift compact
//! protocol and Protobuf. Each frame decodes into a [`Call`] and each result
//! encodes from a [`Response`], so the dispatcher never sees wire types and
//! every behavior is identical across transports.
//!
//! The four per-kind `setOption` wire methods (string, bytes, int, double)
//! collapse into one canonical `SetOption` call carrying an
//! [`OptionValue`](crate::options::OptionValue).

pub mod pb;
pub mod thrift;

use crate::error::{Error, Result};
use crate::handle::Handle;
use crate::options::OptionValue;

/// Wire method names, shared verbatim by both encodings.
pub mod methods {
    pub const DATABASE_NEW: &str = "databaseNew";
    pub const DATABASE_SET_OPTION: &str = "databaseSetOption";
    pub const DATABASE_SET_OPTION_BYTES: &str = "databaseSetOptionBytes";
    pub const DATABASE_SET_OPTION_INT: &str = "databaseSetOptionInt";
    pub const DATABASE_SET_OPTION_DOUBLE: &str = "databaseSetOptionDouble";
    pub const DATABASE_INIT: &str = "databaseInit";
    pub const DATABASE_RELEASE: &str = "databaseRelease";

    pub const CONNECTION_NEW: &str = "connectionNew";
    pub const CONNECTION_SET_OPTION: &str = "connectionSetOption";
    pub const CONNECTION_SET_OPTION_BYTES: &str = "connectionSetOptionBytes";
    pub const CONNECTION_SET_OPTION_INT: &str = "connectionSetOptionInt";
    pub const CONNECTION_SET_OPTION_DOUBLE: &str = "connectionSetOptionDouble";
    pub const CONNECTION_INIT: &str = "connectionInit";
    pub const CONNECTION_RELEASE: &str = "connectionRelease";
    pub const CONNECTION_GET_INFO: &str = "connectionGetInfo";
    pub const CONNECTION_GET_OBJECTS: &str = "connectionGetObjects";
    pub const CONNECTION_GET_TABLE_SCHEMA: &str = "connectionGetTableSchema";
    pub const CONNECTION_GET_TABLE_TYPES: &str = "connectionGetTableTypes";
    pub const CONNECTION_COMMIT: &str = "connectionCommit";
    pub const CONNECTION_ROLLBACK: &str = "connectionRollback";

    pub const STATEMENT_NEW: &str = "statementNew";
    pub const STATEMENT_SET_OPTION: &str = "statementSetOption";
    pub const STATEMENT_SET_OPTION_BYTES: &str = "statementSetOptionBytes";
    pub const STATEMENT_SET_OPTION_INT: &str = "statementSetOptionInt";
    pub const STATEMENT_SET_OPTION_DOUBLE: &str = "statementSetOptionDouble";
    pub const STATEMENT_RELEASE: &str = "statementRelease";
    pub const STATEMENT_SET_SQL_QUERY: &str = "statementSetSqlQuery";
    pub const STATEMENT_SET_SUBSTRAIT_PLAN: &str = "statementSetSubstraitPlan";
    pub const STATEMENT_BIND: &str = "statementBind";
    pub const STATEMENT_BIND_STREAM: &str = "statementBindStream";
    pub const STATEMENT_PREPARE: &str = "statementPrepare";
    pub const STATEMENT_GET_PARAMETER_SCHEMA: &str = "statementGetParameterSchema";
    pub const STATEMENT_EXECUTE_QUERY: &str = "statementExecuteQuery";
    pub const STATEMENT_EXECUTE_UPDATE: &str = "statementExecuteUpdate";
    pub const STATEMENT_EXECUTE_PARTITIONS: &str = "statementExecutePartitions";
    pub const STATEMENT_READ_PARTITION: &str = "statementReadPartition";
}

/// One decoded request, independent of the wire encoding.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    DatabaseNew,
    DatabaseSetOption {
        handle: Handle,
        key: String,
        value: OptionValue,
    },
    DatabaseInit {
        handle: Handle,
    },
    DatabaseRelease {
        handle: Handle,
    },

    ConnectionNew,
    ConnectionSetOption {
        handle: Handle,
        key: String,
        value: OptionValue,
    },
    ConnectionInit {
        handle: Handle,
        database: Handle,
    },
    ConnectionRelease {
        handle: Handle,
    },
    ConnectionGetInfo {
        handle: Handle,
        codes: Vec<u32>,
    },
    ConnectionGetObjects {
        handle: Handle,
        depth: i32,
        catalog: Option<String>,
        db_schema: Option<String>,
        table_name: Option<String>,
        table_type: Vec<String>,
        column_name: Option<String>,
    },
    ConnectionGetTableSchema {
        handle: Handle,
        catalog: Option<String>,
        db_schema: Option<String>,
        table_name: String,
    },
    ConnectionGetTableTypes {
        handle: Handle,
    },
    ConnectionCommit {
        handle: Handle,
    },
    ConnectionRollback {
        handle: Handle,
    },

    StatementNew {
        connection: Handle,
    },
    StatementSetOption {
        handle: Handle,
        key: String,
        value: OptionValue,
    },
    StatementRelease {
        handle: Handle,
    },
    StatementSetSqlQuery {
        handle: Handle,
        query: String,
    },
    StatementSetSubstraitPlan {
        handle: Handle,
        plan: Vec<u8>,
    },
    StatementBind {
        handle: Handle,
        schema: Vec<u8>,
        array: Vec<u8>,
    },
    StatementBindStream {
        handle: Handle,
        stream: Vec<u8>,
    },
    StatementPrepare {
        handle: Handle,
    },
    StatementGetParameterSchema {
        handle: Handle,
    },
    StatementExecuteQuery {
        handle: Handle,
    },
    StatementExecuteUpdate {
        handle: Handle,
    },
    StatementExecutePartitions {
        handle: Handle,
    },
    StatementReadPartition {
        handle: Handle,
        descriptor: Vec<u8>,
    },
}

impl Call {
    /// The wire method name this call serializes as.
    pub fn method(&self) -> &'static str {
        use methods::*;
        match self {
            Call::DatabaseNew => DATABASE_NEW,
            Call::DatabaseSetOption { value, .. } => set_option_method(
                value,
                DATABASE_SET_OPTION,
                DATABASE_SET_OPTION_BYTES,
                DATABASE_SET_OPTION_INT,
                DATABASE_SET_OPTION_DOUBLE,
            ),
            Call::DatabaseInit { .. } => DATABASE_INIT,
            Call::DatabaseRelease { .. } => DATABASE_RELEASE,
            Call::ConnectionNew => CONNECTION_NEW,
            Call::ConnectionSetOption { value, .. } => set_option_method(
                value,
                CONNECTION_SET_OPTION,
                CONNECTION_SET_OPTION_BYTES,
                CONNECTION_SET_OPTION_INT,
                CONNECTION_SET_OPTION_DOUBLE,
            ),
            Call::ConnectionInit { .. } => CONNECTION_INIT,
            Call::ConnectionRelease { .. } => CONNECTION_RELEASE,
            Call::ConnectionGetInfo { .. } => CONNECTION_GET_INFO,
            Call::ConnectionGetObjects { .. } => CONNECTION_GET_OBJECTS,
            Call::ConnectionGetTableSchema { .. } => CONNECTION_GET_TABLE_SCHEMA,
            Call::ConnectionGetTableTypes { .. } => CONNECTION_GET_TABLE_TYPES,
            Call::ConnectionCommit { .. } => CONNECTION_COMMIT,
            Call::ConnectionRollback { .. } => CONNECTION_ROLLBACK,
            Call::StatementNew { .. } => STATEMENT_NEW,
            Call::StatementSetOption { value, .. } => set_option_method(
                value,
                STATEMENT_SET_OPTION,
                STATEMENT_SET_OPTION_BYTES,
                STATEMENT_SET_OPTION_INT,
                STATEMENT_SET_OPTION_DOUBLE,
            ),
            Call::StatementRelease { .. } => STATEMENT_RELEASE,
            Call::StatementSetSqlQuery { .. } => STATEMENT_SET_SQL_QUERY,
            Call::StatementSetSubstraitPlan { .. } => STATEMENT_SET_SUBSTRAIT_PLAN,
            Call::StatementBind { .. } => STATEMENT_BIND,
            Call::StatementBindStream { .. } => STATEMENT_BIND_STREAM,
            Call::StatementPrepare { .. } => STATEMENT_PREPARE,
            Call::StatementGetParameterSchema { .. } => STATEMENT_GET_PARAMETER_SCHEMA,
            Call::StatementExecuteQuery { .. } => STATEMENT_EXECUTE_QUERY,
            Call::StatementExecuteUpdate { .. } => STATEMENT_EXECUTE_UPDATE,
            Call::StatementExecutePartitions { .. } => STATEMENT_EXECUTE_PARTITIONS,
            Call::StatementReadPartition { .. } => STATEMENT_READ_PARTITION,
        }
    }
}

fn set_option_method(
    value: &OptionValue,
    string: &'static str,
    bytes: &'static str,
    int: &'static str,
    double: &'static str,
) -> &'static str {
    match value {
        OptionValue::String(_) => string,
        OptionValue::Bytes(_) => bytes,
        OptionValue::Int(_) => int,
        OptionValue::Double(_) => double,
    }
}

/// One successful dispatch result, independent of the wire encoding.
///
/// Arrow payloads are pointer blobs ([`crate::interchange`]) or serialized
/// IPC streams; the codec never inspects them.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Unit,
    Handle(Handle),
    /// Arrow IPC stream bytes (metadata results).
    Bytes(Vec<u8>),
    /// Exported `ArrowSchema` pointer blob.
    SchemaPtr(Vec<u8>),
    /// Exported `ArrowArrayStream` pointer blob plus rows affected.
    Execute {
        stream: Vec<u8>,
        rows_affected: i64,
    },
    /// Partitioned execution: exported schema blob plus opaque descriptors.
    Partitions {
        schema: Vec<u8>,
        partitions: Vec<Vec<u8>>,
        rows_affected: i64,
    },
    RowCount(i64),
}

/// The result payload layout of one wire method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseShape {
    Unit,
    Handle,
    Bytes,
    SchemaPtr,
    Execute,
    Partitions,
    RowCount,
}

/// The response shape of a wire method, or `None` for unknown methods.
pub fn response_shape(method: &str) -> Option<ResponseShape> {
    use methods::*;
    let shape = match method {
        DATABASE_NEW | CONNECTION_NEW => ResponseShape::Handle,
        STATEMENT_NEW => ResponseShape::Handle,
        DATABASE_SET_OPTION | DATABASE_SET_OPTION_BYTES | DATABASE_SET_OPTION_INT
        | DATABASE_SET_OPTION_DOUBLE | DATABASE_INIT | DATABASE_RELEASE | CONNECTION_SET_OPTION
        | CONNECTION_SET_OPTION_BYTES | CONNECTION_SET_OPTION_INT | CONNECTION_SET_OPTION_DOUBLE
        | CONNECTION_INIT | CONNECTION_RELEASE | CONNECTION_COMMIT | CONNECTION_ROLLBACK
        | STATEMENT_SET_OPTION | STATEMENT_SET_OPTION_BYTES | STATEMENT_SET_OPTION_INT
        | STATEMENT_SET_OPTION_DOUBLE | STATEMENT_RELEASE | STATEMENT_SET_SQL_QUERY
        | STATEMENT_SET_SUBSTRAIT_PLAN | STATEMENT_BIND | STATEMENT_BIND_STREAM
        | STATEMENT_PREPARE => ResponseShape::Unit,
        CONNECTION_GET_INFO | CONNECTION_GET_OBJECTS | CONNECTION_GET_TABLE_SCHEMA
        | CONNECTION_GET_TABLE_TYPES => ResponseShape::Bytes,
        STATEMENT_GET_PARAMETER_SCHEMA => ResponseShape::SchemaPtr,
        STATEMENT_EXECUTE_QUERY | STATEMENT_READ_PARTITION => ResponseShape::Execute,
        STATEMENT_EXECUTE_UPDATE => ResponseShape::RowCount,
        STATEMENT_EXECUTE_PARTITIONS => ResponseShape::Partitions,
        _ => return None,
    };
    Some(shape)
}

/// A decoded request frame.
///
/// `call` is `Err` when the method is unknown or the body is malformed; the
/// dispatcher still has the method name and sequence to produce a properly
/// correlated exception response.
#[derive(Debug)]
pub struct Request {
    pub method: String,
    pub sequence: i32,
    pub call: Result<Call>,
}

/// One wire encoding of the RPC surface.
///
/// Both directions are implemented so guest bridges and tests can drive the
/// codec as the client side too.
pub trait TransportCodec: Send + Sync {
    /// Decode one request frame.
    ///
    /// Fails only on frame-level corruption; method- and body-level problems
    /// are reported inside [`Request::call`].
    fn decode_request(&self, frame: &[u8]) -> Result<Request>;

    /// Encode one dispatch outcome as a response frame.
    fn encode_response(
        &self,
        method: &str,
        sequence: i32,
        outcome: &Result<Response>,
    ) -> Result<Vec<u8>>;

    /// Encode a call as a request frame (client side).
    fn encode_request(&self, sequence: i32, call: &Call) -> Result<Vec<u8>>;

    /// Decode a response frame (client side), returning the sequence and the
    /// dispatch outcome it carries.
    fn decode_response(&self, method: &str, frame: &[u8]) -> Result<(i32, Result<Response>)>;
}

/// Error raised for a method name no codec knows.
pub(crate) fn unknown_method(method: &str) -> Error {
    Error::not_implemented().message(format!("unknown method '{method}'"))
}
