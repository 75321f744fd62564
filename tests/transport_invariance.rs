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

//! The wire format must be unobservable: the same sequence of driver calls
//! produces the same outcomes over Thrift compact protocol and Protobuf.
//!
//! Handles and exported pointers are process-unique, so outcomes are
//! compared by semantics (success shape, status code, vendor fields, row
//! counts, decoded metadata payloads), not by frame bytes.

use arrow_array::RecordBatch;
use arrow_ipc::reader::StreamReader;
use borealdb_core::codec::{Call, Response, TransportCodec};
use borealdb_core::testing::MockWarehouse;
use borealdb_core::{CoreDispatcher, DriverChannel, Handle, OptionValue, WireFormat};
use std::sync::Arc;

/// What a guest can observe of one outcome, minus process-unique values.
#[derive(Debug, PartialEq)]
enum Observed {
    Unit,
    Handle,
    /// Decoded IPC batches.
    Metadata(Vec<RecordBatch>),
    SchemaPtr,
    Execute {
        rows_affected: i64,
    },
    Partitions {
        count: usize,
        rows_affected: i64,
    },
    RowCount(i64),
    Exception {
        status: i32,
        vendor_code: Option<i32>,
        sqlstate: Option<String>,
        message: String,
    },
}

struct Guest {
    channel: DriverChannel,
    codec: Box<dyn TransportCodec>,
    sequence: i32,
    /// Handles allocated so far, indexed by allocation order.
    handles: Vec<Handle>,
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
            handles: Vec::new(),
        }
    }

    fn observe(&mut self, call: Call) -> Observed {
        self.sequence += 1;
        let method = call.method();
        let frame = self.codec.encode_request(self.sequence, &call).unwrap();
        self.channel.write(&frame);
        self.channel.flush().unwrap();
        let mut response = vec![0u8; self.channel.pending()];
        self.channel.read(&mut response);
        let (sequence, outcome) = self.codec.decode_response(method, &response).unwrap();
        assert_eq!(sequence, self.sequence);

        match outcome {
            Ok(Response::Unit) => Observed::Unit,
            Ok(Response::Handle(handle)) => {
                self.handles.push(handle);
                Observed::Handle
            }
            Ok(Response::Bytes(ipc)) => {
                let reader = StreamReader::try_new(std::io::Cursor::new(ipc), None).unwrap();
                Observed::Metadata(reader.map(|b| b.unwrap()).collect())
            }
            Ok(Response::SchemaPtr(blob)) => {
                reclaim_schema(&blob);
                Observed::SchemaPtr
            }
            Ok(Response::Execute {
                stream,
                rows_affected,
            }) => {
                // Drain and release the exported stream.
                let reader = borealdb_core::interchange::import_stream(&stream).unwrap();
                for batch in reader {
                    batch.unwrap();
                }
                Observed::Execute { rows_affected }
            }
            Ok(Response::Partitions {
                schema,
                partitions,
                rows_affected,
            }) => {
                reclaim_schema(&schema);
                Observed::Partitions {
                    count: partitions.len(),
                    rows_affected,
                }
            }
            Ok(Response::RowCount(rows)) => Observed::RowCount(rows),
            Err(error) => Observed::Exception {
                status: error.status as i32,
                vendor_code: error.vendor_code,
                sqlstate: error.sqlstate,
                message: error.message,
            },
        }
    }
}

fn reclaim_schema(blob: &[u8]) {
    let addr = borealdb_core::interchange::decode_pointer(blob).unwrap();
    drop(unsafe {
        arrow_schema::ffi::FFI_ArrowSchema::from_raw(
            addr as *mut arrow_schema::ffi::FFI_ArrowSchema,
        )
    });
}

/// A scripted guest session touching every lifecycle rule. Handles are
/// referenced by allocation index so the script replays on any transport.
fn script(guest: &mut Guest) -> Vec<Observed> {
    let mut log = Vec::new();
    let mut step = |guest: &mut Guest, make: &dyn Fn(&[Handle]) -> Call| {
        let call = make(&guest.handles);
        log.push(guest.observe(call));
    };

    step(guest, &|_| Call::DatabaseNew); // handle 0
    step(guest, &|h| Call::DatabaseSetOption {
        handle: h[0],
        key: "uri".into(),
        value: OptionValue::String("boreal://warehouse".into()),
    });
    step(guest, &|h| Call::DatabaseInit { handle: h[0] });
    // Sealed key after init.
    step(guest, &|h| Call::DatabaseSetOption {
        handle: h[0],
        key: "uri".into(),
        value: OptionValue::String("boreal://other".into()),
    });

    step(guest, &|_| Call::ConnectionNew); // handle 1
    step(guest, &|h| Call::ConnectionSetOption {
        handle: h[1],
        key: "user".into(),
        value: OptionValue::String("alice".into()),
    });
    step(guest, &|h| Call::ConnectionInit {
        handle: h[1],
        database: h[0],
    });
    step(guest, &|h| Call::ConnectionGetInfo {
        handle: h[1],
        codes: vec![],
    });
    step(guest, &|h| Call::ConnectionGetTableTypes { handle: h[1] });

    step(guest, &|h| Call::StatementNew { connection: h[1] }); // handle 2
    // Execute before any query is set.
    step(guest, &|h| Call::StatementExecuteQuery { handle: h[2] });
    step(guest, &|h| Call::StatementSetSqlQuery {
        handle: h[2],
        query: "SELECT * FROM events WHERE id = ?".into(),
    });
    step(guest, &|h| Call::StatementPrepare { handle: h[2] });
    step(guest, &|h| Call::StatementGetParameterSchema { handle: h[2] });
    step(guest, &|h| Call::StatementExecuteQuery { handle: h[2] });
    step(guest, &|h| Call::StatementSetSqlQuery {
        handle: h[2],
        query: "DELETE FROM events".into(),
    });
    step(guest, &|h| Call::StatementExecuteUpdate { handle: h[2] });
    // Remote compilation failure with vendor fields.
    step(guest, &|h| Call::StatementSetSqlQuery {
        handle: h[2],
        query: "SYNTAX ERROR".into(),
    });
    step(guest, &|h| Call::StatementExecuteQuery { handle: h[2] });
    step(guest, &|h| Call::StatementSetSqlQuery {
        handle: h[2],
        query: "SELECT v FROM events".into(),
    });
    step(guest, &|h| Call::StatementExecutePartitions { handle: h[2] });

    // Transactions.
    step(guest, &|h| Call::ConnectionCommit { handle: h[1] });
    step(guest, &|h| Call::ConnectionSetOption {
        handle: h[1],
        key: "autocommit".into(),
        value: OptionValue::String("false".into()),
    });
    step(guest, &|h| Call::ConnectionCommit { handle: h[1] });

    // Metadata with filters.
    step(guest, &|h| Call::ConnectionGetObjects {
        handle: h[1],
        depth: 3,
        catalog: Some("main".into()),
        db_schema: Some("pub%".into()),
        table_name: None,
        table_type: vec!["TABLE".into()],
        column_name: None,
    });

    // Teardown and use-after-free.
    step(guest, &|h| Call::ConnectionRelease { handle: h[1] });
    step(guest, &|h| Call::StatementExecuteQuery { handle: h[2] });
    step(guest, &|h| Call::ConnectionRelease { handle: h[1] });
    step(guest, &|h| Call::DatabaseRelease { handle: h[0] });
    step(guest, &|h| Call::DatabaseRelease { handle: h[0] });

    log
}

#[test]
fn test_script_is_transport_invariant() {
    let mut thrift_guest = Guest::new(WireFormat::ThriftCompact);
    let mut pb_guest = Guest::new(WireFormat::Protobuf);

    let thrift_log = script(&mut thrift_guest);
    let pb_log = script(&mut pb_guest);

    assert_eq!(thrift_log.len(), pb_log.len());
    for (i, (a, b)) in thrift_log.iter().zip(&pb_log).enumerate() {
        assert_eq!(a, b, "step {i} diverged between transports");
    }
}

#[test]
fn test_script_outcomes_are_the_expected_ones() {
    let mut guest = Guest::new(WireFormat::ThriftCompact);
    let log = script(&mut guest);

    // Spot-check the interesting steps by index.
    assert_eq!(log[0], Observed::Handle); // databaseNew
    assert!(matches!(log[3], Observed::Exception { status: 6, .. })); // sealed uri
    assert!(matches!(log[10], Observed::Exception { status: 6, .. })); // execute, no query
    assert_eq!(log[13], Observed::SchemaPtr); // parameter schema
    assert_eq!(log[14], Observed::Execute { rows_affected: -1 });
    assert_eq!(log[16], Observed::RowCount(3)); // DML
    assert!(matches!(
        log[18],
        Observed::Exception {
            status: 5,
            vendor_code: Some(1003),
            ..
        }
    )); // SYNTAX ERROR
    assert_eq!(
        log[20],
        Observed::Partitions {
            count: 2,
            rows_affected: -1
        }
    );
    assert!(matches!(log[21], Observed::Exception { status: 6, .. })); // commit in autocommit
    assert_eq!(log[23], Observed::Unit); // commit in manual mode
    assert_eq!(log[25], Observed::Unit); // connectionRelease
    assert!(matches!(log[26], Observed::Exception { status: 6, .. })); // cascaded statement
    assert!(matches!(log[27], Observed::Exception { status: 6, .. })); // double release
}
