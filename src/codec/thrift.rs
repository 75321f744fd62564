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

//! Thrift compact protocol encoding of the RPC surface.
//!
//! Each request frame is one Thrift `Call` message whose body is a struct of
//! positional fields; each response is one `Reply` message with the success
//! value in field 0 and a `DriverException` struct in field 1. Handles are
//! two `i64` fields (id, then magic); the handle kind is implied by the
//! method name.
//!
//! Request bodies are read through a generic field bag rather than generated
//! stubs, so malformed bodies degrade to a typed error instead of a frame
//! abort.

use super::{
    methods, response_shape, unknown_method, Call, Request, Response, ResponseShape,
    TransportCodec,
};
use crate::error::{Error, Result, StatusCode};
use crate::handle::{Handle, HandleKind};
use crate::options::OptionValue;
use std::collections::HashMap;
use std::io::Cursor;
use thrift::protocol::{
    TCompactInputProtocol, TCompactOutputProtocol, TFieldIdentifier, TInputProtocol,
    TListIdentifier, TMessageIdentifier, TMessageType, TOutputProtocol, TStructIdentifier, TType,
};

fn wire_err(e: thrift::Error) -> Error {
    Error::invalid_data().message(format!("malformed Thrift frame: {e}"))
}

/// One decoded field value. Strings arrive as bytes (the compact wire type
/// is identical) and are UTF-8 checked on access.
#[derive(Debug, Clone)]
enum FieldValue {
    Bool(bool),
    I32(i32),
    I64(i64),
    Double(f64),
    Bytes(Vec<u8>),
    List(Vec<FieldValue>),
}

/// Preallocation cap for wire-declared list sizes. The declared length is
/// untrusted; the vec grows as elements actually decode, and truncated input
/// fails on the element read.
const LIST_PREALLOC_CAP: i32 = 64;

/// All fields of one request struct, keyed by field id.
struct FieldBag {
    fields: HashMap<i16, FieldValue>,
}

impl FieldBag {
    fn read(input: &mut impl TInputProtocol) -> Result<Self> {
        let mut fields = HashMap::new();
        input.read_struct_begin().map_err(wire_err)?;
        loop {
            let ident = input.read_field_begin().map_err(wire_err)?;
            if ident.field_type == TType::Stop {
                break;
            }
            let value = Self::read_value(input, ident.field_type)?;
            if let (Some(id), Some(value)) = (ident.id, value) {
                fields.insert(id, value);
            }
            input.read_field_end().map_err(wire_err)?;
        }
        input.read_struct_end().map_err(wire_err)?;
        Ok(FieldBag { fields })
    }

    fn read_value(
        input: &mut impl TInputProtocol,
        field_type: TType,
    ) -> Result<Option<FieldValue>> {
        let value = match field_type {
            TType::Bool => Some(FieldValue::Bool(input.read_bool().map_err(wire_err)?)),
            TType::I32 => Some(FieldValue::I32(input.read_i32().map_err(wire_err)?)),
            TType::I64 => Some(FieldValue::I64(input.read_i64().map_err(wire_err)?)),
            TType::Double => Some(FieldValue::Double(input.read_double().map_err(wire_err)?)),
            TType::String => Some(FieldValue::Bytes(input.read_bytes().map_err(wire_err)?)),
            TType::List => {
                let list_ident = input.read_list_begin().map_err(wire_err)?;
                let mut items =
                    Vec::with_capacity(list_ident.size.clamp(0, LIST_PREALLOC_CAP) as usize);
                for _ in 0..list_ident.size {
                    if let Some(item) = Self::read_value(input, list_ident.element_type)? {
                        items.push(item);
                    }
                }
                input.read_list_end().map_err(wire_err)?;
                Some(FieldValue::List(items))
            }
            // Unknown field types are skipped, not fatal.
            other => {
                input.skip(other).map_err(wire_err)?;
                None
            }
        };
        Ok(value)
    }

    fn missing(id: i16, what: &str) -> Error {
        Error::invalid_data().message(format!("request field {id} ({what}) missing or mistyped"))
    }

    fn i64(&self, id: i16, what: &str) -> Result<i64> {
        match self.fields.get(&id) {
            Some(FieldValue::I64(v)) => Ok(*v),
            _ => Err(Self::missing(id, what)),
        }
    }

    fn i32(&self, id: i16, what: &str) -> Result<i32> {
        match self.fields.get(&id) {
            Some(FieldValue::I32(v)) => Ok(*v),
            _ => Err(Self::missing(id, what)),
        }
    }

    fn double(&self, id: i16, what: &str) -> Result<f64> {
        match self.fields.get(&id) {
            Some(FieldValue::Double(v)) => Ok(*v),
            _ => Err(Self::missing(id, what)),
        }
    }

    fn bytes(&self, id: i16, what: &str) -> Result<Vec<u8>> {
        match self.fields.get(&id) {
            Some(FieldValue::Bytes(v)) => Ok(v.clone()),
            _ => Err(Self::missing(id, what)),
        }
    }

    fn string(&self, id: i16, what: &str) -> Result<String> {
        String::from_utf8(self.bytes(id, what)?)
            .map_err(|_| Error::invalid_data().message(format!("field {id} ({what}) is not UTF-8")))
    }

    fn opt_string(&self, id: i16, what: &str) -> Result<Option<String>> {
        match self.fields.get(&id) {
            None => Ok(None),
            Some(_) => self.string(id, what).map(Some),
        }
    }

    fn string_list(&self, id: i16, what: &str) -> Result<Vec<String>> {
        let items = match self.fields.get(&id) {
            None => return Ok(Vec::new()),
            Some(FieldValue::List(items)) => items,
            Some(_) => return Err(Self::missing(id, what)),
        };
        items
            .iter()
            .map(|item| match item {
                FieldValue::Bytes(b) => String::from_utf8(b.clone()).map_err(|_| {
                    Error::invalid_data().message(format!("field {id} ({what}) is not UTF-8"))
                }),
                _ => Err(Self::missing(id, what)),
            })
            .collect()
    }

    fn u32_list(&self, id: i16, what: &str) -> Result<Vec<u32>> {
        let items = match self.fields.get(&id) {
            None => return Ok(Vec::new()),
            Some(FieldValue::List(items)) => items,
            Some(_) => return Err(Self::missing(id, what)),
        };
        items
            .iter()
            .map(|item| match item {
                FieldValue::I32(v) => Ok(*v as u32),
                _ => Err(Self::missing(id, what)),
            })
            .collect()
    }

    fn handle(&self, kind: HandleKind, first_id: i16) -> Result<Handle> {
        Ok(Handle {
            id: self.i64(first_id, "handle id")? as u64,
            magic: self.i64(first_id + 1, "handle magic")? as u64,
            kind,
        })
    }
}

/// Writes one struct of positional fields.
struct FieldWriter<'a, P: TOutputProtocol> {
    output: &'a mut P,
}

impl<'a, P: TOutputProtocol> FieldWriter<'a, P> {
    fn begin(output: &'a mut P, name: &str) -> Result<Self> {
        output
            .write_struct_begin(&TStructIdentifier::new(name))
            .map_err(wire_err)?;
        Ok(FieldWriter { output })
    }

    fn field(&mut self, id: i16, field_type: TType) -> Result<()> {
        self.output
            .write_field_begin(&TFieldIdentifier::new::<Option<String>, String, i16>(
                None, field_type, id,
            ))
            .map_err(wire_err)
    }

    fn end_field(&mut self) -> Result<()> {
        self.output.write_field_end().map_err(wire_err)
    }

    fn i64(&mut self, id: i16, value: i64) -> Result<()> {
        self.field(id, TType::I64)?;
        self.output.write_i64(value).map_err(wire_err)?;
        self.end_field()
    }

    fn i32(&mut self, id: i16, value: i32) -> Result<()> {
        self.field(id, TType::I32)?;
        self.output.write_i32(value).map_err(wire_err)?;
        self.end_field()
    }

    fn double(&mut self, id: i16, value: f64) -> Result<()> {
        self.field(id, TType::Double)?;
        self.output.write_double(value).map_err(wire_err)?;
        self.end_field()
    }

    fn string(&mut self, id: i16, value: &str) -> Result<()> {
        self.field(id, TType::String)?;
        self.output.write_string(value).map_err(wire_err)?;
        self.end_field()
    }

    fn bytes(&mut self, id: i16, value: &[u8]) -> Result<()> {
        self.field(id, TType::String)?;
        self.output.write_bytes(value).map_err(wire_err)?;
        self.end_field()
    }

    fn handle(&mut self, first_id: i16, handle: Handle) -> Result<()> {
        self.i64(first_id, handle.id as i64)?;
        self.i64(first_id + 1, handle.magic as i64)
    }

    fn string_list(&mut self, id: i16, values: &[String]) -> Result<()> {
        self.field(id, TType::List)?;
        self.output
            .write_list_begin(&TListIdentifier::new(TType::String, values.len() as i32))
            .map_err(wire_err)?;
        for value in values {
            self.output.write_string(value).map_err(wire_err)?;
        }
        self.output.write_list_end().map_err(wire_err)?;
        self.end_field()
    }

    fn bytes_list(&mut self, id: i16, values: &[Vec<u8>]) -> Result<()> {
        self.field(id, TType::List)?;
        self.output
            .write_list_begin(&TListIdentifier::new(TType::String, values.len() as i32))
            .map_err(wire_err)?;
        for value in values {
            self.output.write_bytes(value).map_err(wire_err)?;
        }
        self.output.write_list_end().map_err(wire_err)?;
        self.end_field()
    }

    fn i32_list(&mut self, id: i16, values: &[u32]) -> Result<()> {
        self.field(id, TType::List)?;
        self.output
            .write_list_begin(&TListIdentifier::new(TType::I32, values.len() as i32))
            .map_err(wire_err)?;
        for value in values {
            self.output.write_i32(*value as i32).map_err(wire_err)?;
        }
        self.output.write_list_end().map_err(wire_err)?;
        self.end_field()
    }

    fn finish(self) -> Result<()> {
        self.output.write_field_stop().map_err(wire_err)?;
        self.output.write_struct_end().map_err(wire_err)
    }
}

/// The Thrift compact protocol codec.
#[derive(Debug, Default)]
pub struct ThriftCodec;

impl ThriftCodec {
    pub fn new() -> Self {
        ThriftCodec
    }

    fn parse_call(method: &str, bag: &FieldBag) -> Result<Call> {
        use methods::*;
        let call = match method {
            DATABASE_NEW => Call::DatabaseNew,
            DATABASE_SET_OPTION | DATABASE_SET_OPTION_BYTES | DATABASE_SET_OPTION_INT
            | DATABASE_SET_OPTION_DOUBLE => Call::DatabaseSetOption {
                handle: bag.handle(HandleKind::Database, 1)?,
                key: bag.string(3, "option key")?,
                value: Self::parse_option_value(method, bag)?,
            },
            DATABASE_INIT => Call::DatabaseInit {
                handle: bag.handle(HandleKind::Database, 1)?,
            },
            DATABASE_RELEASE => Call::DatabaseRelease {
                handle: bag.handle(HandleKind::Database, 1)?,
            },

            CONNECTION_NEW => Call::ConnectionNew,
            CONNECTION_SET_OPTION | CONNECTION_SET_OPTION_BYTES | CONNECTION_SET_OPTION_INT
            | CONNECTION_SET_OPTION_DOUBLE => Call::ConnectionSetOption {
                handle: bag.handle(HandleKind::Connection, 1)?,
                key: bag.string(3, "option key")?,
                value: Self::parse_option_value(method, bag)?,
            },
            CONNECTION_INIT => Call::ConnectionInit {
                handle: bag.handle(HandleKind::Connection, 1)?,
                database: bag.handle(HandleKind::Database, 3)?,
            },
            CONNECTION_RELEASE => Call::ConnectionRelease {
                handle: bag.handle(HandleKind::Connection, 1)?,
            },
            CONNECTION_GET_INFO => Call::ConnectionGetInfo {
                handle: bag.handle(HandleKind::Connection, 1)?,
                codes: bag.u32_list(3, "info codes")?,
            },
            CONNECTION_GET_OBJECTS => Call::ConnectionGetObjects {
                handle: bag.handle(HandleKind::Connection, 1)?,
                depth: bag.i32(3, "depth")?,
                catalog: bag.opt_string(4, "catalog")?,
                db_schema: bag.opt_string(5, "db_schema")?,
                table_name: bag.opt_string(6, "table_name")?,
                table_type: bag.string_list(7, "table_type")?,
                column_name: bag.opt_string(8, "column_name")?,
            },
            CONNECTION_GET_TABLE_SCHEMA => Call::ConnectionGetTableSchema {
                handle: bag.handle(HandleKind::Connection, 1)?,
                catalog: bag.opt_string(3, "catalog")?,
                db_schema: bag.opt_string(4, "db_schema")?,
                table_name: bag.string(5, "table_name")?,
            },
            CONNECTION_GET_TABLE_TYPES => Call::ConnectionGetTableTypes {
                handle: bag.handle(HandleKind::Connection, 1)?,
            },
            CONNECTION_COMMIT => Call::ConnectionCommit {
                handle: bag.handle(HandleKind::Connection, 1)?,
            },
            CONNECTION_ROLLBACK => Call::ConnectionRollback {
                handle: bag.handle(HandleKind::Connection, 1)?,
            },

            STATEMENT_NEW => Call::StatementNew {
                connection: bag.handle(HandleKind::Connection, 1)?,
            },
            STATEMENT_SET_OPTION | STATEMENT_SET_OPTION_BYTES | STATEMENT_SET_OPTION_INT
            | STATEMENT_SET_OPTION_DOUBLE => Call::StatementSetOption {
                handle: bag.handle(HandleKind::Statement, 1)?,
                key: bag.string(3, "option key")?,
                value: Self::parse_option_value(method, bag)?,
            },
            STATEMENT_RELEASE => Call::StatementRelease {
                handle: bag.handle(HandleKind::Statement, 1)?,
            },
            STATEMENT_SET_SQL_QUERY => Call::StatementSetSqlQuery {
                handle: bag.handle(HandleKind::Statement, 1)?,
                query: bag.string(3, "query")?,
            },
            STATEMENT_SET_SUBSTRAIT_PLAN => Call::StatementSetSubstraitPlan {
                handle: bag.handle(HandleKind::Statement, 1)?,
                plan: bag.bytes(3, "plan")?,
            },
            STATEMENT_BIND => Call::StatementBind {
                handle: bag.handle(HandleKind::Statement, 1)?,
                schema: bag.bytes(3, "schema pointer")?,
                array: bag.bytes(4, "array pointer")?,
            },
            STATEMENT_BIND_STREAM => Call::StatementBindStream {
                handle: bag.handle(HandleKind::Statement, 1)?,
                stream: bag.bytes(3, "stream pointer")?,
            },
            STATEMENT_PREPARE => Call::StatementPrepare {
                handle: bag.handle(HandleKind::Statement, 1)?,
            },
            STATEMENT_GET_PARAMETER_SCHEMA => Call::StatementGetParameterSchema {
                handle: bag.handle(HandleKind::Statement, 1)?,
            },
            STATEMENT_EXECUTE_QUERY => Call::StatementExecuteQuery {
                handle: bag.handle(HandleKind::Statement, 1)?,
            },
            STATEMENT_EXECUTE_UPDATE => Call::StatementExecuteUpdate {
                handle: bag.handle(HandleKind::Statement, 1)?,
            },
            STATEMENT_EXECUTE_PARTITIONS => Call::StatementExecutePartitions {
                handle: bag.handle(HandleKind::Statement, 1)?,
            },
            STATEMENT_READ_PARTITION => Call::StatementReadPartition {
                handle: bag.handle(HandleKind::Statement, 1)?,
                descriptor: bag.bytes(3, "partition descriptor")?,
            },
            other => return Err(unknown_method(other)),
        };
        Ok(call)
    }

    /// Option values live in field 4, typed per the method name suffix.
    fn parse_option_value(method: &str, bag: &FieldBag) -> Result<OptionValue> {
        let value = if method.ends_with("Bytes") {
            OptionValue::Bytes(bag.bytes(4, "option value")?)
        } else if method.ends_with("Int") {
            OptionValue::Int(bag.i64(4, "option value")?)
        } else if method.ends_with("Double") {
            OptionValue::Double(bag.double(4, "option value")?)
        } else {
            OptionValue::String(bag.string(4, "option value")?)
        };
        Ok(value)
    }

    fn write_call(writer: &mut FieldWriter<'_, impl TOutputProtocol>, call: &Call) -> Result<()> {
        match call {
            Call::DatabaseNew | Call::ConnectionNew => Ok(()),
            Call::DatabaseSetOption { handle, key, value }
            | Call::ConnectionSetOption { handle, key, value }
            | Call::StatementSetOption { handle, key, value } => {
                writer.handle(1, *handle)?;
                writer.string(3, key)?;
                match value {
                    OptionValue::String(v) => writer.string(4, v),
                    OptionValue::Bytes(v) => writer.bytes(4, v),
                    OptionValue::Int(v) => writer.i64(4, *v),
                    OptionValue::Double(v) => writer.double(4, *v),
                }
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
            | Call::StatementExecutePartitions { handle } => writer.handle(1, *handle),
            Call::StatementNew { connection } => writer.handle(1, *connection),
            Call::ConnectionInit { handle, database } => {
                writer.handle(1, *handle)?;
                writer.handle(3, *database)
            }
            Call::ConnectionGetInfo { handle, codes } => {
                writer.handle(1, *handle)?;
                writer.i32_list(3, codes)
            }
            Call::ConnectionGetObjects {
                handle,
                depth,
                catalog,
                db_schema,
                table_name,
                table_type,
                column_name,
            } => {
                writer.handle(1, *handle)?;
                writer.i32(3, *depth)?;
                if let Some(catalog) = catalog {
                    writer.string(4, catalog)?;
                }
                if let Some(db_schema) = db_schema {
                    writer.string(5, db_schema)?;
                }
                if let Some(table_name) = table_name {
                    writer.string(6, table_name)?;
                }
                writer.string_list(7, table_type)?;
                if let Some(column_name) = column_name {
                    writer.string(8, column_name)?;
                }
                Ok(())
            }
            Call::ConnectionGetTableSchema {
                handle,
                catalog,
                db_schema,
                table_name,
            } => {
                writer.handle(1, *handle)?;
                if let Some(catalog) = catalog {
                    writer.string(3, catalog)?;
                }
                if let Some(db_schema) = db_schema {
                    writer.string(4, db_schema)?;
                }
                writer.string(5, table_name)
            }
            Call::StatementSetSqlQuery { handle, query } => {
                writer.handle(1, *handle)?;
                writer.string(3, query)
            }
            Call::StatementSetSubstraitPlan { handle, plan } => {
                writer.handle(1, *handle)?;
                writer.bytes(3, plan)
            }
            Call::StatementBind {
                handle,
                schema,
                array,
            } => {
                writer.handle(1, *handle)?;
                writer.bytes(3, schema)?;
                writer.bytes(4, array)
            }
            Call::StatementBindStream { handle, stream } => {
                writer.handle(1, *handle)?;
                writer.bytes(3, stream)
            }
            Call::StatementReadPartition { handle, descriptor } => {
                writer.handle(1, *handle)?;
                writer.bytes(3, descriptor)
            }
        }
    }

    fn write_success(
        writer: &mut FieldWriter<'_, impl TOutputProtocol>,
        response: &Response,
    ) -> Result<()> {
        match response {
            Response::Unit => Ok(()),
            Response::Handle(handle) => {
                writer.field(0, TType::Struct)?;
                let mut inner = FieldWriter::begin(writer.output, "handle")?;
                inner.i64(1, handle.id as i64)?;
                inner.i64(2, handle.magic as i64)?;
                inner.finish()?;
                writer.end_field()
            }
            Response::Bytes(bytes) | Response::SchemaPtr(bytes) => writer.bytes(0, bytes),
            Response::Execute {
                stream,
                rows_affected,
            } => {
                writer.field(0, TType::Struct)?;
                let mut inner = FieldWriter::begin(writer.output, "execute")?;
                inner.bytes(1, stream)?;
                inner.i64(2, *rows_affected)?;
                inner.finish()?;
                writer.end_field()
            }
            Response::Partitions {
                schema,
                partitions,
                rows_affected,
            } => {
                writer.field(0, TType::Struct)?;
                let mut inner = FieldWriter::begin(writer.output, "partitions")?;
                inner.bytes(1, schema)?;
                inner.bytes_list(2, partitions)?;
                inner.i64(3, *rows_affected)?;
                inner.finish()?;
                writer.end_field()
            }
            Response::RowCount(count) => writer.i64(0, *count),
        }
    }

    fn write_exception(
        writer: &mut FieldWriter<'_, impl TOutputProtocol>,
        error: &Error,
    ) -> Result<()> {
        writer.field(1, TType::Struct)?;
        let mut inner = FieldWriter::begin(writer.output, "DriverException")?;
        inner.string(1, &error.message)?;
        inner.i32(2, error.status as i32)?;
        if let Some(vendor_code) = error.vendor_code {
            inner.i32(3, vendor_code)?;
        }
        if let Some(sqlstate) = &error.sqlstate {
            inner.string(4, sqlstate)?;
        }
        if !error.details.is_empty() {
            inner.field(5, TType::List)?;
            inner
                .output
                .write_list_begin(&TListIdentifier::new(
                    TType::Struct,
                    error.details.len() as i32,
                ))
                .map_err(wire_err)?;
            for (key, value) in &error.details {
                let mut detail = FieldWriter::begin(inner.output, "detail")?;
                detail.string(1, key)?;
                detail.string(2, value)?;
                detail.finish()?;
            }
            inner.output.write_list_end().map_err(wire_err)?;
            inner.end_field()?;
        }
        inner.finish()?;
        writer.end_field()
    }

    fn read_exception(input: &mut impl TInputProtocol) -> Result<Error> {
        let mut error = Error::unknown();
        input.read_struct_begin().map_err(wire_err)?;
        loop {
            let ident = input.read_field_begin().map_err(wire_err)?;
            match (ident.field_type, ident.id) {
                (TType::Stop, _) => break,
                (TType::String, Some(1)) => {
                    error.message = input.read_string().map_err(wire_err)?;
                }
                (TType::I32, Some(2)) => {
                    error.status = StatusCode::from_i32(input.read_i32().map_err(wire_err)?);
                }
                (TType::I32, Some(3)) => {
                    error.vendor_code = Some(input.read_i32().map_err(wire_err)?);
                }
                (TType::String, Some(4)) => {
                    error.sqlstate = Some(input.read_string().map_err(wire_err)?);
                }
                (TType::List, Some(5)) => {
                    let list_ident = input.read_list_begin().map_err(wire_err)?;
                    for _ in 0..list_ident.size {
                        let bag = FieldBag::read(input)?;
                        error
                            .details
                            .push((bag.string(1, "detail key")?, bag.string(2, "detail value")?));
                    }
                    input.read_list_end().map_err(wire_err)?;
                }
                (other, _) => input.skip(other).map_err(wire_err)?,
            }
            input.read_field_end().map_err(wire_err)?;
        }
        input.read_struct_end().map_err(wire_err)?;
        Ok(error)
    }

    fn read_success(
        input: &mut impl TInputProtocol,
        shape: ResponseShape,
        method: &str,
    ) -> Result<Response> {
        let response = match shape {
            // Unit responses carry no field 0 at all; handled by the caller.
            ResponseShape::Unit => Response::Unit,
            ResponseShape::Handle => {
                let bag = FieldBag::read(input)?;
                Response::Handle(Handle {
                    id: bag.i64(1, "handle id")? as u64,
                    magic: bag.i64(2, "handle magic")? as u64,
                    kind: handle_kind_for(method)?,
                })
            }
            ResponseShape::Bytes => Response::Bytes(input.read_bytes().map_err(wire_err)?),
            ResponseShape::SchemaPtr => Response::SchemaPtr(input.read_bytes().map_err(wire_err)?),
            ResponseShape::Execute => {
                let bag = FieldBag::read(input)?;
                Response::Execute {
                    stream: bag.bytes(1, "stream pointer")?,
                    rows_affected: bag.i64(2, "rows affected")?,
                }
            }
            ResponseShape::Partitions => {
                let bag = FieldBag::read(input)?;
                let partitions = match bag.fields.get(&2) {
                    Some(FieldValue::List(items)) => items
                        .iter()
                        .map(|item| match item {
                            FieldValue::Bytes(b) => Ok(b.clone()),
                            _ => Err(FieldBag::missing(2, "partitions")),
                        })
                        .collect::<Result<Vec<_>>>()?,
                    _ => return Err(FieldBag::missing(2, "partitions")),
                };
                Response::Partitions {
                    schema: bag.bytes(1, "schema pointer")?,
                    partitions,
                    rows_affected: bag.i64(3, "rows affected")?,
                }
            }
            ResponseShape::RowCount => Response::RowCount(input.read_i64().map_err(wire_err)?),
        };
        Ok(response)
    }
}

/// The handle kind created by a `*New` method.
fn handle_kind_for(method: &str) -> Result<HandleKind> {
    match method {
        methods::DATABASE_NEW => Ok(HandleKind::Database),
        methods::CONNECTION_NEW => Ok(HandleKind::Connection),
        methods::STATEMENT_NEW => Ok(HandleKind::Statement),
        other => Err(unknown_method(other)),
    }
}

impl TransportCodec for ThriftCodec {
    fn decode_request(&self, frame: &[u8]) -> Result<Request> {
        let mut input = TCompactInputProtocol::new(Cursor::new(frame));
        let ident = input.read_message_begin().map_err(wire_err)?;
        if ident.message_type != TMessageType::Call {
            return Err(Error::invalid_data()
                .message(format!("expected a Call message, got {:?}", ident.message_type)));
        }
        // The body is consumed even for unknown methods, so the error that
        // comes back is about the method, not the framing.
        let bag = FieldBag::read(&mut input)?;
        input.read_message_end().map_err(wire_err)?;
        let call = Self::parse_call(&ident.name, &bag);
        Ok(Request {
            method: ident.name,
            sequence: ident.sequence_number,
            call,
        })
    }

    fn encode_response(
        &self,
        method: &str,
        sequence: i32,
        outcome: &Result<Response>,
    ) -> Result<Vec<u8>> {
        let mut buffer = Vec::new();
        let mut output = TCompactOutputProtocol::new(&mut buffer);
        output
            .write_message_begin(&TMessageIdentifier::new(method, TMessageType::Reply, sequence))
            .map_err(wire_err)?;
        let mut writer = FieldWriter::begin(&mut output, "result")?;
        match outcome {
            Ok(response) => Self::write_success(&mut writer, response)?,
            Err(error) => Self::write_exception(&mut writer, error)?,
        }
        writer.finish()?;
        output.write_message_end().map_err(wire_err)?;
        output.flush().map_err(wire_err)?;
        drop(output);
        Ok(buffer)
    }

    fn encode_request(&self, sequence: i32, call: &Call) -> Result<Vec<u8>> {
        let mut buffer = Vec::new();
        let mut output = TCompactOutputProtocol::new(&mut buffer);
        output
            .write_message_begin(&TMessageIdentifier::new(
                call.method(),
                TMessageType::Call,
                sequence,
            ))
            .map_err(wire_err)?;
        let mut writer = FieldWriter::begin(&mut output, "args")?;
        Self::write_call(&mut writer, call)?;
        writer.finish()?;
        output.write_message_end().map_err(wire_err)?;
        output.flush().map_err(wire_err)?;
        drop(output);
        Ok(buffer)
    }

    fn decode_response(&self, method: &str, frame: &[u8]) -> Result<(i32, Result<Response>)> {
        let shape = response_shape(method).ok_or_else(|| unknown_method(method))?;
        let mut input = TCompactInputProtocol::new(Cursor::new(frame));
        let ident = input.read_message_begin().map_err(wire_err)?;
        if ident.message_type != TMessageType::Reply {
            return Err(Error::invalid_data()
                .message(format!("expected a Reply message, got {:?}", ident.message_type)));
        }

        input.read_struct_begin().map_err(wire_err)?;
        let mut outcome: Result<Response> = Ok(Response::Unit);
        loop {
            let field = input.read_field_begin().map_err(wire_err)?;
            match (field.field_type, field.id) {
                (TType::Stop, _) => break,
                (_, Some(0)) => outcome = Ok(Self::read_success(&mut input, shape, method)?),
                (TType::Struct, Some(1)) => outcome = Err(Self::read_exception(&mut input)?),
                (other, _) => input.skip(other).map_err(wire_err)?,
            }
            input.read_field_end().map_err(wire_err)?;
        }
        input.read_struct_end().map_err(wire_err)?;
        input.read_message_end().map_err(wire_err)?;
        Ok((ident.sequence_number, outcome))
    }
}
