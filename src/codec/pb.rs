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

//! Protobuf encoding of the RPC surface.
//!
//! Each frame is a `RequestEnvelope` or `ResponseEnvelope` whose `body` is
//! the serialized per-method message. The envelope decodes independently of
//! the body, so an unknown method or a corrupt body still yields a response
//! with the right sequence number.

use super::{
    methods, response_shape, unknown_method, Call, Request, Response, ResponseShape,
    TransportCodec,
};
use crate::error::{Error, Result, StatusCode};
use crate::handle::{Handle, HandleKind};
use crate::options::OptionValue;
use prost::Message;

fn wire_err(e: prost::DecodeError) -> Error {
    Error::invalid_data().message(format!("malformed Protobuf frame: {e}"))
}

#[derive(Clone, PartialEq, Message)]
pub struct HandlePb {
    #[prost(uint64, tag = "1")]
    pub id: u64,
    #[prost(uint64, tag = "2")]
    pub magic: u64,
}

impl HandlePb {
    fn from_handle(handle: Handle) -> Self {
        HandlePb {
            id: handle.id,
            magic: handle.magic,
        }
    }

    fn into_handle(self, kind: HandleKind) -> Handle {
        Handle {
            id: self.id,
            magic: self.magic,
            kind,
        }
    }
}

fn required_handle(handle: Option<HandlePb>, kind: HandleKind) -> Result<Handle> {
    handle
        .map(|h| h.into_handle(kind))
        .ok_or_else(|| Error::invalid_data().message("request is missing its handle"))
}

#[derive(Clone, PartialEq, Message)]
pub struct RequestEnvelope {
    #[prost(string, tag = "1")]
    pub method: String,
    #[prost(int32, tag = "2")]
    pub sequence: i32,
    #[prost(bytes = "vec", tag = "3")]
    pub body: Vec<u8>,
}

#[derive(Clone, PartialEq, Message)]
pub struct ResponseEnvelope {
    #[prost(string, tag = "1")]
    pub method: String,
    #[prost(int32, tag = "2")]
    pub sequence: i32,
    #[prost(bytes = "vec", tag = "3")]
    pub body: Vec<u8>,
    #[prost(message, optional, tag = "4")]
    pub exception: Option<DriverExceptionPb>,
}

#[derive(Clone, PartialEq, Message)]
pub struct DriverExceptionPb {
    #[prost(string, tag = "1")]
    pub message: String,
    #[prost(int32, tag = "2")]
    pub status_code: i32,
    #[prost(sint32, optional, tag = "3")]
    pub vendor_code: Option<i32>,
    #[prost(string, optional, tag = "4")]
    pub sqlstate: Option<String>,
    #[prost(message, repeated, tag = "5")]
    pub details: Vec<DetailPb>,
}

#[derive(Clone, PartialEq, Message)]
pub struct DetailPb {
    #[prost(string, tag = "1")]
    pub key: String,
    #[prost(string, tag = "2")]
    pub value: String,
}

impl DriverExceptionPb {
    fn from_error(error: &Error) -> Self {
        DriverExceptionPb {
            message: error.message.clone(),
            status_code: error.status as i32,
            vendor_code: error.vendor_code,
            sqlstate: error.sqlstate.clone(),
            details: error
                .details
                .iter()
                .map(|(key, value)| DetailPb {
                    key: key.clone(),
                    value: value.clone(),
                })
                .collect(),
        }
    }

    fn into_error(self) -> Error {
        Error {
            message: self.message,
            status: StatusCode::from_i32(self.status_code),
            vendor_code: self.vendor_code,
            sqlstate: self.sqlstate,
            details: self
                .details
                .into_iter()
                .map(|d| (d.key, d.value))
                .collect(),
        }
    }
}

// --- Request bodies ---

#[derive(Clone, PartialEq, Message)]
pub struct HandleBody {
    #[prost(message, optional, tag = "1")]
    pub handle: Option<HandlePb>,
}

#[derive(Clone, PartialEq, Message)]
pub struct SetOptionBody {
    #[prost(message, optional, tag = "1")]
    pub handle: Option<HandlePb>,
    #[prost(string, tag = "2")]
    pub key: String,
    #[prost(string, optional, tag = "3")]
    pub string_value: Option<String>,
    #[prost(bytes = "vec", optional, tag = "4")]
    pub bytes_value: Option<Vec<u8>>,
    #[prost(sint64, optional, tag = "5")]
    pub int_value: Option<i64>,
    #[prost(double, optional, tag = "6")]
    pub double_value: Option<f64>,
}

#[derive(Clone, PartialEq, Message)]
pub struct ConnectionInitBody {
    #[prost(message, optional, tag = "1")]
    pub handle: Option<HandlePb>,
    #[prost(message, optional, tag = "2")]
    pub database: Option<HandlePb>,
}

#[derive(Clone, PartialEq, Message)]
pub struct GetInfoBody {
    #[prost(message, optional, tag = "1")]
    pub handle: Option<HandlePb>,
    #[prost(uint32, repeated, tag = "2")]
    pub codes: Vec<u32>,
}

#[derive(Clone, PartialEq, Message)]
pub struct GetObjectsBody {
    #[prost(message, optional, tag = "1")]
    pub handle: Option<HandlePb>,
    #[prost(int32, tag = "2")]
    pub depth: i32,
    #[prost(string, optional, tag = "3")]
    pub catalog: Option<String>,
    #[prost(string, optional, tag = "4")]
    pub db_schema: Option<String>,
    #[prost(string, optional, tag = "5")]
    pub table_name: Option<String>,
    #[prost(string, repeated, tag = "6")]
    pub table_type: Vec<String>,
    #[prost(string, optional, tag = "7")]
    pub column_name: Option<String>,
}

#[derive(Clone, PartialEq, Message)]
pub struct GetTableSchemaBody {
    #[prost(message, optional, tag = "1")]
    pub handle: Option<HandlePb>,
    #[prost(string, optional, tag = "2")]
    pub catalog: Option<String>,
    #[prost(string, optional, tag = "3")]
    pub db_schema: Option<String>,
    #[prost(string, tag = "4")]
    pub table_name: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct QueryBody {
    #[prost(message, optional, tag = "1")]
    pub handle: Option<HandlePb>,
    #[prost(string, tag = "2")]
    pub query: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct PlanBody {
    #[prost(message, optional, tag = "1")]
    pub handle: Option<HandlePb>,
    #[prost(bytes = "vec", tag = "2")]
    pub plan: Vec<u8>,
}

#[derive(Clone, PartialEq, Message)]
pub struct BindBody {
    #[prost(message, optional, tag = "1")]
    pub handle: Option<HandlePb>,
    #[prost(bytes = "vec", tag = "2")]
    pub schema: Vec<u8>,
    #[prost(bytes = "vec", tag = "3")]
    pub array: Vec<u8>,
}

#[derive(Clone, PartialEq, Message)]
pub struct BindStreamBody {
    #[prost(message, optional, tag = "1")]
    pub handle: Option<HandlePb>,
    #[prost(bytes = "vec", tag = "2")]
    pub stream: Vec<u8>,
}

#[derive(Clone, PartialEq, Message)]
pub struct ReadPartitionBody {
    #[prost(message, optional, tag = "1")]
    pub handle: Option<HandlePb>,
    #[prost(bytes = "vec", tag = "2")]
    pub descriptor: Vec<u8>,
}

// --- Response bodies ---

#[derive(Clone, PartialEq, Message)]
pub struct BytesBody {
    #[prost(bytes = "vec", tag = "1")]
    pub payload: Vec<u8>,
}

#[derive(Clone, PartialEq, Message)]
pub struct ExecuteBody {
    #[prost(bytes = "vec", tag = "1")]
    pub stream: Vec<u8>,
    #[prost(sint64, tag = "2")]
    pub rows_affected: i64,
}

#[derive(Clone, PartialEq, Message)]
pub struct PartitionsBody {
    #[prost(bytes = "vec", tag = "1")]
    pub schema: Vec<u8>,
    #[prost(bytes = "vec", repeated, tag = "2")]
    pub partitions: Vec<Vec<u8>>,
    #[prost(sint64, tag = "3")]
    pub rows_affected: i64,
}

#[derive(Clone, PartialEq, Message)]
pub struct RowCountBody {
    #[prost(sint64, tag = "1")]
    pub rows_affected: i64,
}

/// The Protobuf codec.
#[derive(Debug, Default)]
pub struct ProtobufCodec;

impl ProtobufCodec {
    pub fn new() -> Self {
        ProtobufCodec
    }

    fn parse_call(method: &str, body: &[u8]) -> Result<Call> {
        use methods::*;
        let call = match method {
            DATABASE_NEW => Call::DatabaseNew,
            DATABASE_SET_OPTION | DATABASE_SET_OPTION_BYTES | DATABASE_SET_OPTION_INT
            | DATABASE_SET_OPTION_DOUBLE => {
                let body = SetOptionBody::decode(body).map_err(wire_err)?;
                Call::DatabaseSetOption {
                    handle: required_handle(body.handle.clone(), HandleKind::Database)?,
                    value: Self::option_value(method, &body)?,
                    key: body.key,
                }
            }
            DATABASE_INIT => Call::DatabaseInit {
                handle: Self::sole_handle(body, HandleKind::Database)?,
            },
            DATABASE_RELEASE => Call::DatabaseRelease {
                handle: Self::sole_handle(body, HandleKind::Database)?,
            },

            CONNECTION_NEW => Call::ConnectionNew,
            CONNECTION_SET_OPTION | CONNECTION_SET_OPTION_BYTES | CONNECTION_SET_OPTION_INT
            | CONNECTION_SET_OPTION_DOUBLE => {
                let body = SetOptionBody::decode(body).map_err(wire_err)?;
                Call::ConnectionSetOption {
                    handle: required_handle(body.handle.clone(), HandleKind::Connection)?,
                    value: Self::option_value(method, &body)?,
                    key: body.key,
                }
            }
            CONNECTION_INIT => {
                let body = ConnectionInitBody::decode(body).map_err(wire_err)?;
                Call::ConnectionInit {
                    handle: required_handle(body.handle, HandleKind::Connection)?,
                    database: required_handle(body.database, HandleKind::Database)?,
                }
            }
            CONNECTION_RELEASE => Call::ConnectionRelease {
                handle: Self::sole_handle(body, HandleKind::Connection)?,
            },
            CONNECTION_GET_INFO => {
                let body = GetInfoBody::decode(body).map_err(wire_err)?;
                Call::ConnectionGetInfo {
                    handle: required_handle(body.handle, HandleKind::Connection)?,
                    codes: body.codes,
                }
            }
            CONNECTION_GET_OBJECTS => {
                let body = GetObjectsBody::decode(body).map_err(wire_err)?;
                Call::ConnectionGetObjects {
                    handle: required_handle(body.handle, HandleKind::Connection)?,
                    depth: body.depth,
                    catalog: body.catalog,
                    db_schema: body.db_schema,
                    table_name: body.table_name,
                    table_type: body.table_type,
                    column_name: body.column_name,
                }
            }
            CONNECTION_GET_TABLE_SCHEMA => {
                let body = GetTableSchemaBody::decode(body).map_err(wire_err)?;
                Call::ConnectionGetTableSchema {
                    handle: required_handle(body.handle, HandleKind::Connection)?,
                    catalog: body.catalog,
                    db_schema: body.db_schema,
                    table_name: body.table_name,
                }
            }
            CONNECTION_GET_TABLE_TYPES => Call::ConnectionGetTableTypes {
                handle: Self::sole_handle(body, HandleKind::Connection)?,
            },
            CONNECTION_COMMIT => Call::ConnectionCommit {
                handle: Self::sole_handle(body, HandleKind::Connection)?,
            },
            CONNECTION_ROLLBACK => Call::ConnectionRollback {
                handle: Self::sole_handle(body, HandleKind::Connection)?,
            },

            STATEMENT_NEW => Call::StatementNew {
                connection: Self::sole_handle(body, HandleKind::Connection)?,
            },
            STATEMENT_SET_OPTION | STATEMENT_SET_OPTION_BYTES | STATEMENT_SET_OPTION_INT
            | STATEMENT_SET_OPTION_DOUBLE => {
                let body = SetOptionBody::decode(body).map_err(wire_err)?;
                Call::StatementSetOption {
                    handle: required_handle(body.handle.clone(), HandleKind::Statement)?,
                    value: Self::option_value(method, &body)?,
                    key: body.key,
                }
            }
            STATEMENT_RELEASE => Call::StatementRelease {
                handle: Self::sole_handle(body, HandleKind::Statement)?,
            },
            STATEMENT_SET_SQL_QUERY => {
                let body = QueryBody::decode(body).map_err(wire_err)?;
                Call::StatementSetSqlQuery {
                    handle: required_handle(body.handle, HandleKind::Statement)?,
                    query: body.query,
                }
            }
            STATEMENT_SET_SUBSTRAIT_PLAN => {
                let body = PlanBody::decode(body).map_err(wire_err)?;
                Call::StatementSetSubstraitPlan {
                    handle: required_handle(body.handle, HandleKind::Statement)?,
                    plan: body.plan,
                }
            }
            STATEMENT_BIND => {
                let body = BindBody::decode(body).map_err(wire_err)?;
                Call::StatementBind {
                    handle: required_handle(body.handle, HandleKind::Statement)?,
                    schema: body.schema,
                    array: body.array,
                }
            }
            STATEMENT_BIND_STREAM => {
                let body = BindStreamBody::decode(body).map_err(wire_err)?;
                Call::StatementBindStream {
                    handle: required_handle(body.handle, HandleKind::Statement)?,
                    stream: body.stream,
                }
            }
            STATEMENT_PREPARE => Call::StatementPrepare {
                handle: Self::sole_handle(body, HandleKind::Statement)?,
            },
            STATEMENT_GET_PARAMETER_SCHEMA => Call::StatementGetParameterSchema {
                handle: Self::sole_handle(body, HandleKind::Statement)?,
            },
            STATEMENT_EXECUTE_QUERY => Call::StatementExecuteQuery {
                handle: Self::sole_handle(body, HandleKind::Statement)?,
            },
            STATEMENT_EXECUTE_UPDATE => Call::StatementExecuteUpdate {
                handle: Self::sole_handle(body, HandleKind::Statement)?,
            },
            STATEMENT_EXECUTE_PARTITIONS => Call::StatementExecutePartitions {
                handle: Self::sole_handle(body, HandleKind::Statement)?,
            },
            STATEMENT_READ_PARTITION => {
                let body = ReadPartitionBody::decode(body).map_err(wire_err)?;
                Call::StatementReadPartition {
                    handle: required_handle(body.handle, HandleKind::Statement)?,
                    descriptor: body.descriptor,
                }
            }
            other => return Err(unknown_method(other)),
        };
        Ok(call)
    }

    fn sole_handle(body: &[u8], kind: HandleKind) -> Result<Handle> {
        let body = HandleBody::decode(body).map_err(wire_err)?;
        required_handle(body.handle, kind)
    }

    /// Exactly one value field is set, matching the method name suffix.
    fn option_value(method: &str, body: &SetOptionBody) -> Result<OptionValue> {
        let value = if method.ends_with("Bytes") {
            body.bytes_value.clone().map(OptionValue::Bytes)
        } else if method.ends_with("Int") {
            body.int_value.map(OptionValue::Int)
        } else if method.ends_with("Double") {
            body.double_value.map(OptionValue::Double)
        } else {
            body.string_value.clone().map(OptionValue::String)
        };
        value.ok_or_else(|| {
            Error::invalid_data().message(format!("'{method}' request is missing its value"))
        })
    }

    fn encode_call(call: &Call) -> Vec<u8> {
        match call {
            Call::DatabaseNew | Call::ConnectionNew => Vec::new(),
            Call::DatabaseSetOption { handle, key, value }
            | Call::ConnectionSetOption { handle, key, value }
            | Call::StatementSetOption { handle, key, value } => {
                let mut body = SetOptionBody {
                    handle: Some(HandlePb::from_handle(*handle)),
                    key: key.clone(),
                    string_value: None,
                    bytes_value: None,
                    int_value: None,
                    double_value: None,
                };
                match value {
                    OptionValue::String(v) => body.string_value = Some(v.clone()),
                    OptionValue::Bytes(v) => body.bytes_value = Some(v.clone()),
                    OptionValue::Int(v) => body.int_value = Some(*v),
                    OptionValue::Double(v) => body.double_value = Some(*v),
                }
                body.encode_to_vec()
            }
            Call::DatabaseInit { handle }
            | Call::DatabaseRelease { handle }
            | Call::ConnectionRelease { handle }
            | Call::ConnectionGetTableTypes { handle }
            | Call::ConnectionCommit { handle }
            | Call::ConnectionRollback { handle }
            | Call::StatementRelease { handle }
            | Call::StatementPrepare { handle }
            | Call::StatementGetParameterSchema { handle }
            | Call::StatementExecuteQuery { handle }
            | Call::StatementExecuteUpdate { handle }
            | Call::StatementExecutePartitions { handle } => HandleBody {
                handle: Some(HandlePb::from_handle(*handle)),
            }
            .encode_to_vec(),
            Call::StatementNew { connection } => HandleBody {
                handle: Some(HandlePb::from_handle(*connection)),
            }
            .encode_to_vec(),
            Call::ConnectionInit { handle, database } => ConnectionInitBody {
                handle: Some(HandlePb::from_handle(*handle)),
                database: Some(HandlePb::from_handle(*database)),
            }
            .encode_to_vec(),
            Call::ConnectionGetInfo { handle, codes } => GetInfoBody {
                handle: Some(HandlePb::from_handle(*handle)),
                codes: codes.clone(),
            }
            .encode_to_vec(),
            Call::ConnectionGetObjects {
                handle,
                depth,
                catalog,
                db_schema,
                table_name,
                table_type,
                column_name,
            } => GetObjectsBody {
                handle: Some(HandlePb::from_handle(*handle)),
                depth: *depth,
                catalog: catalog.clone(),
                db_schema: db_schema.clone(),
                table_name: table_name.clone(),
                table_type: table_type.clone(),
                column_name: column_name.clone(),
            }
            .encode_to_vec(),
            Call::ConnectionGetTableSchema {
                handle,
                catalog,
                db_schema,
                table_name,
            } => GetTableSchemaBody {
                handle: Some(HandlePb::from_handle(*handle)),
                catalog: catalog.clone(),
                db_schema: db_schema.clone(),
                table_name: table_name.clone(),
            }
            .encode_to_vec(),
            Call::StatementSetSqlQuery { handle, query } => QueryBody {
                handle: Some(HandlePb::from_handle(*handle)),
                query: query.clone(),
            }
            .encode_to_vec(),
            Call::StatementSetSubstraitPlan { handle, plan } => PlanBody {
                handle: Some(HandlePb::from_handle(*handle)),
                plan: plan.clone(),
            }
            .encode_to_vec(),
            Call::StatementBind {
                handle,
                schema,
                array,
            } => BindBody {
                handle: Some(HandlePb::from_handle(*handle)),
                schema: schema.clone(),
                array: array.clone(),
            }
            .encode_to_vec(),
            Call::StatementBindStream { handle, stream } => BindStreamBody {
                handle: Some(HandlePb::from_handle(*handle)),
                stream: stream.clone(),
            }
            .encode_to_vec(),
            Call::StatementReadPartition { handle, descriptor } => ReadPartitionBody {
                handle: Some(HandlePb::from_handle(*handle)),
                descriptor: descriptor.clone(),
            }
            .encode_to_vec(),
        }
    }

    fn encode_success(response: &Response) -> Vec<u8> {
        match response {
            Response::Unit => Vec::new(),
            Response::Handle(handle) => HandleBody {
                handle: Some(HandlePb::from_handle(*handle)),
            }
            .encode_to_vec(),
            Response::Bytes(payload) | Response::SchemaPtr(payload) => BytesBody {
                payload: payload.clone(),
            }
            .encode_to_vec(),
            Response::Execute {
                stream,
                rows_affected,
            } => ExecuteBody {
                stream: stream.clone(),
                rows_affected: *rows_affected,
            }
            .encode_to_vec(),
            Response::Partitions {
                schema,
                partitions,
                rows_affected,
            } => PartitionsBody {
                schema: schema.clone(),
                partitions: partitions.clone(),
                rows_affected: *rows_affected,
            }
            .encode_to_vec(),
            Response::RowCount(rows_affected) => RowCountBody {
                rows_affected: *rows_affected,
            }
            .encode_to_vec(),
        }
    }

    fn decode_success(method: &str, shape: ResponseShape, body: &[u8]) -> Result<Response> {
        let response = match shape {
            ResponseShape::Unit => Response::Unit,
            ResponseShape::Handle => {
                let kind = match method {
                    methods::DATABASE_NEW => HandleKind::Database,
                    methods::CONNECTION_NEW => HandleKind::Connection,
                    methods::STATEMENT_NEW => HandleKind::Statement,
                    other => return Err(unknown_method(other)),
                };
                let body = HandleBody::decode(body).map_err(wire_err)?;
                Response::Handle(required_handle(body.handle, kind)?)
            }
            ResponseShape::Bytes => {
                Response::Bytes(BytesBody::decode(body).map_err(wire_err)?.payload)
            }
            ResponseShape::SchemaPtr => {
                Response::SchemaPtr(BytesBody::decode(body).map_err(wire_err)?.payload)
            }
            ResponseShape::Execute => {
                let body = ExecuteBody::decode(body).map_err(wire_err)?;
                Response::Execute {
                    stream: body.stream,
                    rows_affected: body.rows_affected,
                }
            }
            ResponseShape::Partitions => {
                let body = PartitionsBody::decode(body).map_err(wire_err)?;
                Response::Partitions {
                    schema: body.schema,
                    partitions: body.partitions,
                    rows_affected: body.rows_affected,
                }
            }
            ResponseShape::RowCount => Response::RowCount(
                RowCountBody::decode(body).map_err(wire_err)?.rows_affected,
            ),
        };
        Ok(response)
    }
}

impl TransportCodec for ProtobufCodec {
    fn decode_request(&self, frame: &[u8]) -> Result<Request> {
        let envelope = RequestEnvelope::decode(frame).map_err(wire_err)?;
        let call = Self::parse_call(&envelope.method, &envelope.body);
        Ok(Request {
            method: envelope.method,
            sequence: envelope.sequence,
            call,
        })
    }

    fn encode_response(
        &self,
        method: &str,
        sequence: i32,
        outcome: &Result<Response>,
    ) -> Result<Vec<u8>> {
        let envelope = match outcome {
            Ok(response) => ResponseEnvelope {
                method: method.to_string(),
                sequence,
                body: Self::encode_success(response),
                exception: None,
            },
            Err(error) => ResponseEnvelope {
                method: method.to_string(),
                sequence,
                body: Vec::new(),
                exception: Some(DriverExceptionPb::from_error(error)),
            },
        };
        Ok(envelope.encode_to_vec())
    }

    fn encode_request(&self, sequence: i32, call: &Call) -> Result<Vec<u8>> {
        let envelope = RequestEnvelope {
            method: call.method().to_string(),
            sequence,
            body: Self::encode_call(call),
        };
        Ok(envelope.encode_to_vec())
    }

    fn decode_response(&self, method: &str, frame: &[u8]) -> Result<(i32, Result<Response>)> {
        let shape = response_shape(method).ok_or_else(|| unknown_method(method))?;
        let envelope = ResponseEnvelope::decode(frame).map_err(wire_err)?;
        let outcome = match envelope.exception {
            Some(exception) => Err(exception.into_error()),
            None => Ok(Self::decode_success(method, shape, &envelope.body)?),
        };
        Ok((envelope.sequence, outcome))
    }
}
