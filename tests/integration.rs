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

//! End-to-end driver flow over encoded frames.
//!
//! These tests drive the core exactly like a guest bridge does: every call
//! is encoded to a wire frame, pushed through a [`DriverChannel`], and the
//! response frame decoded back, against the in-process mock warehouse.

use arrow_array::{Array, Int64Array, StringArray};
use arrow_ipc::reader::StreamReader;
use borealdb_core::codec::{Call, Response, TransportCodec};
use borealdb_core::testing::{MockWarehouse, MOCK_DML_ROWS};
use borealdb_core::{
    interchange, CoreDispatcher, DriverChannel, Error, Handle, OptionValue, Result, StatusCode,
    WireFormat,
};
use std::sync::Arc;

/// A guest bridge in miniature: sequences calls through one channel.
struct Guest {
    channel: DriverChannel,
    codec: Box<dyn TransportCodec>,
    sequence: i32,
}

impl Guest {
    fn new(format: WireFormat) -> Self {
        let dispatcher = Arc::new(
            CoreDispatcher::new(Arc::new(MockWarehouse::new())).expect("dispatcher"),
        );
        Guest {
            channel: DriverChannel::new(dispatcher, format),
            codec: format.codec(),
            sequence: 0,
        }
    }

    fn call(&mut self, call: Call) -> Result<Response> {
        self.sequence += 1;
        let method = call.method();
        let frame = self.codec.encode_request(self.sequence, &call)?;
        self.channel.write(&frame);
        self.channel.flush()?;

        let mut response = vec![0u8; self.channel.pending()];
        let n = self.channel.read(&mut response);
        assert_eq!(n, response.len());

        let (sequence, outcome) = self.codec.decode_response(method, &response)?;
        assert_eq!(sequence, self.sequence, "response correlates by sequence");
        outcome
    }

    fn expect_handle(&mut self, call: Call) -> Handle {
        match self.call(call).expect("handle response") {
            Response::Handle(handle) => handle,
            other => panic!("expected a handle, got {other:?}"),
        }
    }

    /// databaseNew/init + connectionNew/init with valid credentials.
    fn open(&mut self) -> (Handle, Handle) {
        let db = self.expect_handle(Call::DatabaseNew);
        self.call(Call::DatabaseSetOption {
            handle: db,
            key: "uri".into(),
            value: OptionValue::String("boreal://warehouse".into()),
        })
        .unwrap();
        self.call(Call::DatabaseInit { handle: db }).unwrap();

        let conn = self.expect_handle(Call::ConnectionNew);
        self.call(Call::ConnectionSetOption {
            handle: conn,
            key: "user".into(),
            value: OptionValue::String("alice".into()),
        })
        .unwrap();
        self.call(Call::ConnectionInit {
            handle: conn,
            database: db,
        })
        .unwrap();
        (db, conn)
    }
}

fn stream_values(blob: &[u8]) -> Vec<i64> {
    let reader = interchange::import_stream(blob).expect("stream import");
    let mut values = Vec::new();
    for batch in reader {
        let batch = batch.expect("batch");
        let col = batch
            .column(0)
            .as_any()
            .downcast_ref::<Int64Array>()
            .expect("Int64 column");
        values.extend(col.iter().flatten());
    }
    values
}

fn error_of(result: Result<Response>) -> Error {
    result.expect_err("expected a DriverException")
}

#[test]
fn test_full_query_lifecycle() {
    for format in [WireFormat::ThriftCompact, WireFormat::Protobuf] {
        let mut guest = Guest::new(format);
        let (db, conn) = guest.open();

        let st = guest.expect_handle(Call::StatementNew { connection: conn });
        guest
            .call(Call::StatementSetSqlQuery {
                handle: st,
                query: "SELECT 1".into(),
            })
            .unwrap();

        let Response::Execute {
            stream,
            rows_affected,
        } = guest.call(Call::StatementExecuteQuery { handle: st }).unwrap()
        else {
            panic!("expected Execute");
        };
        assert_eq!(rows_affected, -1);
        assert_eq!(stream_values(&stream), vec![1]);

        guest.call(Call::StatementRelease { handle: st }).unwrap();
        guest.call(Call::ConnectionRelease { handle: conn }).unwrap();
        guest.call(Call::DatabaseRelease { handle: db }).unwrap();
    }
}

#[test]
fn test_execute_update_returns_row_count() {
    let mut guest = Guest::new(WireFormat::ThriftCompact);
    let (_db, conn) = guest.open();
    let st = guest.expect_handle(Call::StatementNew { connection: conn });
    guest
        .call(Call::StatementSetSqlQuery {
            handle: st,
            query: "UPDATE events SET ts = NULL".into(),
        })
        .unwrap();
    assert_eq!(
        guest.call(Call::StatementExecuteUpdate { handle: st }).unwrap(),
        Response::RowCount(MOCK_DML_ROWS)
    );
}

#[test]
fn test_release_cascade_invalidates_children() {
    let mut guest = Guest::new(WireFormat::Protobuf);
    let (_db, conn) = guest.open();
    let st = guest.expect_handle(Call::StatementNew { connection: conn });

    guest.call(Call::ConnectionRelease { handle: conn }).unwrap();

    let err = error_of(guest.call(Call::StatementSetSqlQuery {
        handle: st,
        query: "SELECT 1".into(),
    }));
    assert_eq!(err.status, StatusCode::InvalidState);

    // Double release of the connection is also rejected.
    let err = error_of(guest.call(Call::ConnectionRelease { handle: conn }));
    assert_eq!(err.status, StatusCode::InvalidState);
}

#[test]
fn test_login_failure_carries_vendor_fields() {
    let mut guest = Guest::new(WireFormat::ThriftCompact);
    let db = guest.expect_handle(Call::DatabaseNew);
    guest.call(Call::DatabaseInit { handle: db }).unwrap();

    let conn = guest.expect_handle(Call::ConnectionNew);
    for (key, value) in [("user", "alice"), ("password", "wrong")] {
        guest
            .call(Call::ConnectionSetOption {
                handle: conn,
                key: key.into(),
                value: OptionValue::String(value.into()),
            })
            .unwrap();
    }
    let err = error_of(guest.call(Call::ConnectionInit {
        handle: conn,
        database: db,
    }));
    assert_eq!(err.status, StatusCode::Unauthenticated);
    assert_eq!(err.vendor_code, Some(390100));
    assert_eq!(err.sqlstate.as_deref(), Some("28000"));
}

#[test]
fn test_sealed_options_after_init() {
    let mut guest = Guest::new(WireFormat::Protobuf);
    let (db, conn) = guest.open();

    let err = error_of(guest.call(Call::DatabaseSetOption {
        handle: db,
        key: "uri".into(),
        value: OptionValue::String("boreal://other".into()),
    }));
    assert_eq!(err.status, StatusCode::InvalidState);

    let err = error_of(guest.call(Call::ConnectionSetOption {
        handle: conn,
        key: "password".into(),
        value: OptionValue::String("hunter2".into()),
    }));
    assert_eq!(err.status, StatusCode::InvalidState);

    // Non-sealed keys stay mutable.
    guest
        .call(Call::ConnectionSetOption {
            handle: conn,
            key: "query_tag".into(),
            value: OptionValue::String("nightly".into()),
        })
        .unwrap();
}

#[test]
fn test_get_objects_filtering() {
    let mut guest = Guest::new(WireFormat::ThriftCompact);
    let (_db, conn) = guest.open();

    let Response::Bytes(ipc) = guest
        .call(Call::ConnectionGetObjects {
            handle: conn,
            depth: 3,
            catalog: None,
            db_schema: None,
            table_name: Some("ev%".into()),
            table_type: vec![],
            column_name: None,
        })
        .unwrap()
    else {
        panic!("expected Bytes");
    };

    let reader = StreamReader::try_new(std::io::Cursor::new(ipc), None).unwrap();
    let batch = reader.into_iter().next().unwrap().unwrap();
    assert_eq!(batch.num_rows(), 1);
    let tables = batch
        .column(2)
        .as_any()
        .downcast_ref::<StringArray>()
        .unwrap();
    assert_eq!(tables.value(0), "events");
}

#[test]
fn test_get_table_schema_over_frames() {
    let mut guest = Guest::new(WireFormat::Protobuf);
    let (_db, conn) = guest.open();

    let Response::Bytes(ipc) = guest
        .call(Call::ConnectionGetTableSchema {
            handle: conn,
            catalog: None,
            db_schema: Some("public".into()),
            table_name: "events".into(),
        })
        .unwrap()
    else {
        panic!("expected Bytes");
    };
    let reader = StreamReader::try_new(std::io::Cursor::new(ipc), None).unwrap();
    let schema = reader.schema();
    assert_eq!(schema.field(0).name(), "id");
    assert_eq!(schema.field(1).name(), "ts");

    let err = error_of(guest.call(Call::ConnectionGetTableSchema {
        handle: conn,
        catalog: None,
        db_schema: None,
        table_name: "missing".into(),
    }));
    assert_eq!(err.status, StatusCode::NotFound);
}

#[test]
fn test_partitioned_execution_over_frames() {
    let mut guest = Guest::new(WireFormat::ThriftCompact);
    let (_db, conn) = guest.open();
    let st = guest.expect_handle(Call::StatementNew { connection: conn });
    guest
        .call(Call::StatementSetSqlQuery {
            handle: st,
            query: "SELECT v FROM events".into(),
        })
        .unwrap();

    let Response::Partitions {
        schema, partitions, ..
    } = guest
        .call(Call::StatementExecutePartitions { handle: st })
        .unwrap()
    else {
        panic!("expected Partitions");
    };
    assert_eq!(partitions.len(), 2);

    // The exported schema belongs to the guest now; reclaim it.
    let addr = interchange::decode_pointer(&schema).unwrap();
    drop(unsafe {
        arrow_schema::ffi::FFI_ArrowSchema::from_raw(
            addr as *mut arrow_schema::ffi::FFI_ArrowSchema,
        )
    });

    for (descriptor, expected) in partitions.iter().zip([vec![1i64], vec![2i64]]) {
        let Response::Execute { stream, .. } = guest
            .call(Call::StatementReadPartition {
                handle: st,
                descriptor: descriptor.clone(),
            })
            .unwrap()
        else {
            panic!("expected Execute");
        };
        assert_eq!(stream_values(&stream), expected);
    }

    // A corrupted descriptor is rejected without touching the warehouse.
    let err = error_of(guest.call(Call::StatementReadPartition {
        handle: st,
        descriptor: vec![0; 3],
    }));
    assert_eq!(err.status, StatusCode::InvalidArgument);
}

#[test]
fn test_transaction_control() {
    let mut guest = Guest::new(WireFormat::Protobuf);
    let (_db, conn) = guest.open();

    // Autocommit is the default; commit has nothing to act on.
    let err = error_of(guest.call(Call::ConnectionCommit { handle: conn }));
    assert_eq!(err.status, StatusCode::InvalidState);

    guest
        .call(Call::ConnectionSetOption {
            handle: conn,
            key: "autocommit".into(),
            value: OptionValue::String("false".into()),
        })
        .unwrap();
    guest.call(Call::ConnectionCommit { handle: conn }).unwrap();
    guest.call(Call::ConnectionRollback { handle: conn }).unwrap();
}

#[test]
fn test_get_info_over_frames() {
    let mut guest = Guest::new(WireFormat::ThriftCompact);
    let (_db, conn) = guest.open();

    let Response::Bytes(ipc) = guest
        .call(Call::ConnectionGetInfo {
            handle: conn,
            codes: vec![0],
        })
        .unwrap()
    else {
        panic!("expected Bytes");
    };
    let reader = StreamReader::try_new(std::io::Cursor::new(ipc), None).unwrap();
    let batch = reader.into_iter().next().unwrap().unwrap();
    let values = batch
        .column(1)
        .as_any()
        .downcast_ref::<StringArray>()
        .unwrap();
    assert_eq!(values.value(0), "BorealDB");
}
