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

//! Session state and the engine that talks to the warehouse.
//!
//! The engine is the only component touching the remote warehouse. It owns
//! the Tokio runtime and blocks the dispatching thread for the full round
//! trip of every network call; there is no implicit async at the RPC
//! surface and no built-in cancellation.

use crate::client::{
    ObjectDepth, ObjectRow, PartitionOutcome, PartitionToken, PreparedInfo, QueryOutcome,
    QueryRequest, SessionConfig, SessionInfo, WarehouseClient,
};
use crate::error::{Error, Result};
use crate::handle::Handle;
use crate::options::OptionMap;
use arrow_array::{RecordBatch, StringArray, UInt32Array};
use arrow_ipc::writer::StreamWriter;
use arrow_schema::{DataType, Field, Schema, SchemaRef};
use std::sync::Arc;
use tracing::{debug, trace};

// InfoCode IDs: a stable wire contract shared by all guest runtimes.
pub const INFO_VENDOR_NAME: u32 = 0;
pub const INFO_VENDOR_VERSION: u32 = 1;
pub const INFO_VENDOR_ARROW_VERSION: u32 = 2;
pub const INFO_VENDOR_SQL: u32 = 100;
pub const INFO_VENDOR_SUBSTRAIT: u32 = 101;
pub const INFO_VENDOR_SUBSTRAIT_MIN_VERSION: u32 = 102;
pub const INFO_VENDOR_SUBSTRAIT_MAX_VERSION: u32 = 103;
pub const INFO_DRIVER_NAME: u32 = 200;
pub const INFO_DRIVER_VERSION: u32 = 201;
pub const INFO_DRIVER_ARROW_VERSION: u32 = 202;
pub const INFO_DRIVER_ADBC_VERSION: u32 = 203;

const SUBSTRAIT_MIN_VERSION: &str = "0.27.0";
const SUBSTRAIT_MAX_VERSION: &str = "0.57.0";
const ARROW_FORMAT_VERSION: &str = "1.5";

/// Database: a bag of configuration options, snapshotted into connections.
#[derive(Debug, Default)]
pub struct DatabaseSession {
    pub options: OptionMap,
    pub initialized: bool,
}

impl DatabaseSession {
    pub fn new() -> Self {
        Self::default()
    }
}

/// The network half of an initialized connection.
#[derive(Debug)]
pub struct NetworkSession {
    pub info: SessionInfo,
    pub config: SessionConfig,
}

/// Connection: bound to exactly one database at init time.
#[derive(Debug, Default)]
pub struct ConnectionSession {
    pub owning_database: Option<Handle>,
    pub options: OptionMap,
    pub initialized: bool,
    pub autocommit: bool,
    pub network: Option<NetworkSession>,
    /// Child statements, tracked for eager cascade invalidation.
    pub statements: Vec<Handle>,
}

impl ConnectionSession {
    pub fn new() -> Self {
        ConnectionSession {
            autocommit: true,
            ..Default::default()
        }
    }

    /// The network session, or `INVALID_STATE` before `connectionInit`.
    pub fn network(&self) -> Result<&NetworkSession> {
        self.network
            .as_ref()
            .ok_or_else(|| Error::invalid_state().message("connection is not initialized"))
    }
}

/// The most recent `executePartitions` result of one statement.
///
/// The nonce is freshly random per call, so descriptors from an earlier
/// execution (or another statement) fail to resolve.
pub struct PartitionSet {
    pub nonce: u64,
    pub schema: SchemaRef,
    pub tokens: Vec<PartitionToken>,
}

/// Wire width of a partition descriptor: nonce plus index, little-endian.
pub const PARTITION_DESCRIPTOR_LEN: usize = 16;

impl PartitionSet {
    pub fn new(schema: SchemaRef, tokens: Vec<PartitionToken>) -> Self {
        PartitionSet {
            nonce: rand::random::<u64>(),
            schema,
            tokens,
        }
    }

    /// Opaque descriptor for the partition at `index`.
    pub fn descriptor(&self, index: u64) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(PARTITION_DESCRIPTOR_LEN);
        bytes.extend_from_slice(&self.nonce.to_le_bytes());
        bytes.extend_from_slice(&index.to_le_bytes());
        bytes
    }

    /// Resolve a descriptor back to its token.
    ///
    /// Corrupted descriptors and out-of-range indexes fail with
    /// `INVALID_ARGUMENT`; descriptors from another execution with
    /// `NOT_FOUND`.
    pub fn resolve(&self, descriptor: &[u8]) -> Result<&PartitionToken> {
        if descriptor.len() != PARTITION_DESCRIPTOR_LEN {
            return Err(Error::invalid_argument().message(format!(
                "partition descriptor must be {PARTITION_DESCRIPTOR_LEN} bytes, got {}",
                descriptor.len()
            )));
        }
        let mut nonce = [0u8; 8];
        let mut index = [0u8; 8];
        nonce.copy_from_slice(&descriptor[..8]);
        index.copy_from_slice(&descriptor[8..]);
        let nonce = u64::from_le_bytes(nonce);
        let index = u64::from_le_bytes(index);
        if nonce != self.nonce {
            return Err(Error::not_found()
                .message("partition descriptor does not belong to the most recent execution"));
        }
        self.tokens.get(index as usize).ok_or_else(|| {
            Error::invalid_argument().message(format!("partition index {index} out of range"))
        })
    }
}

/// Statement: owns at most one live retained result at a time.
#[derive(Default)]
pub struct StatementSession {
    pub owning_connection: Option<Handle>,
    pub options: OptionMap,
    pub query: Option<String>,
    pub substrait_plan: Option<Vec<u8>>,
    pub bound: Vec<RecordBatch>,
    pub prepared: bool,
    pub parameter_schema: Option<SchemaRef>,
    pub partitions: Option<PartitionSet>,
}

impl StatementSession {
    pub fn new(owning_connection: Handle) -> Self {
        StatementSession {
            owning_connection: Some(owning_connection),
            ..Default::default()
        }
    }

    /// Replace the query text, forcing implicit re-prepare on next execute.
    pub fn set_query(&mut self, query: String) {
        self.query = Some(query);
        self.substrait_plan = None;
        self.reset_compiled();
    }

    pub fn set_plan(&mut self, plan: Vec<u8>) {
        self.query = None;
        self.substrait_plan = Some(plan);
        self.reset_compiled();
    }

    fn reset_compiled(&mut self) {
        self.prepared = false;
        self.parameter_schema = None;
        self.discard_result();
    }

    /// Discard retained native result state before a new execution or on
    /// release, so a prior unconsumed result never leaks.
    pub fn discard_result(&mut self) {
        if self.partitions.take().is_some() {
            trace!(target: "session", "discarded retained partition set");
        }
    }
}

/// Filters for a `connectionGetObjects` listing.
#[derive(Debug, Clone, Default)]
pub struct ObjectFilter {
    pub catalog: Option<String>,
    pub db_schema: Option<String>,
    pub table_name: Option<String>,
    pub table_type: Vec<String>,
    pub column_name: Option<String>,
}

/// Blocking facade over the async [`WarehouseClient`].
///
/// Owns the multi-thread Tokio runtime shared by all connections; every
/// method blocks the caller for the full network round trip.
pub struct SessionEngine {
    client: Arc<dyn WarehouseClient>,
    runtime: tokio::runtime::Runtime,
}

impl SessionEngine {
    pub fn new(client: Arc<dyn WarehouseClient>) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .map_err(|e| Error::io().message(format!("failed to create runtime: {e}")))?;
        Ok(SessionEngine { client, runtime })
    }

    pub fn connect(&self, config: &SessionConfig) -> Result<SessionInfo> {
        debug!("opening warehouse session");
        self.runtime.block_on(self.client.login(config))
    }

    pub fn disconnect(&self, info: &SessionInfo) -> Result<()> {
        debug!(session = %info.session_id, "closing warehouse session");
        self.runtime.block_on(self.client.logout(info))
    }

    pub fn prepare(&self, info: &SessionInfo, request: &QueryRequest) -> Result<PreparedInfo> {
        self.runtime.block_on(self.client.prepare(info, request))
    }

    pub fn execute(&self, info: &SessionInfo, request: QueryRequest) -> Result<QueryOutcome> {
        self.runtime.block_on(self.client.execute(info, request))
    }

    pub fn execute_partitioned(
        &self,
        info: &SessionInfo,
        request: QueryRequest,
    ) -> Result<PartitionOutcome> {
        self.runtime
            .block_on(self.client.execute_partitioned(info, request))
    }

    pub fn fetch_partition(
        &self,
        info: &SessionInfo,
        token: &PartitionToken,
    ) -> Result<QueryOutcome> {
        self.runtime
            .block_on(self.client.fetch_partition(info, token))
    }

    pub fn commit(&self, info: &SessionInfo) -> Result<()> {
        self.runtime.block_on(self.client.commit(info))
    }

    pub fn rollback(&self, info: &SessionInfo) -> Result<()> {
        self.runtime.block_on(self.client.rollback(info))
    }

    /// Render driver/vendor info as Arrow IPC stream bytes.
    ///
    /// An empty `codes` slice returns every known code.
    pub fn get_info(&self, codes: &[u32]) -> Result<Vec<u8>> {
        let all = [
            (INFO_VENDOR_NAME, "BorealDB".to_string()),
            (INFO_VENDOR_VERSION, "unknown".to_string()),
            (INFO_VENDOR_ARROW_VERSION, ARROW_FORMAT_VERSION.to_string()),
            (INFO_VENDOR_SQL, "true".to_string()),
            (INFO_VENDOR_SUBSTRAIT, "true".to_string()),
            (INFO_VENDOR_SUBSTRAIT_MIN_VERSION, SUBSTRAIT_MIN_VERSION.to_string()),
            (INFO_VENDOR_SUBSTRAIT_MAX_VERSION, SUBSTRAIT_MAX_VERSION.to_string()),
            (INFO_DRIVER_NAME, "borealdb-core".to_string()),
            (INFO_DRIVER_VERSION, env!("CARGO_PKG_VERSION").to_string()),
            (INFO_DRIVER_ARROW_VERSION, ARROW_FORMAT_VERSION.to_string()),
            (INFO_DRIVER_ADBC_VERSION, "1.1.0".to_string()),
        ];

        let mut out_codes = Vec::new();
        let mut out_values = Vec::new();
        for (code, value) in all {
            if codes.is_empty() || codes.contains(&code) {
                out_codes.push(code);
                out_values.push(value);
            }
        }

        let schema = Arc::new(Schema::new(vec![
            Field::new("info_code", DataType::UInt32, false),
            Field::new("info_value", DataType::Utf8, true),
        ]));
        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![
                Arc::new(UInt32Array::from(out_codes)),
                Arc::new(StringArray::from(out_values)),
            ],
        )
        .map_err(|e| Error::unknown().message(format!("failed to build info batch: {e}")))?;
        write_ipc(&schema, &[batch])
    }

    /// List catalog objects, filter by LIKE patterns, render as Arrow IPC.
    pub fn get_objects(
        &self,
        info: &SessionInfo,
        depth: ObjectDepth,
        filter: &ObjectFilter,
    ) -> Result<Vec<u8>> {
        let rows = self.runtime.block_on(self.client.list_objects(info, depth))?;

        let rows: Vec<ObjectRow> = rows
            .into_iter()
            .filter(|row| {
                pattern_accepts(filter.catalog.as_deref(), Some(row.catalog.as_str()))
                    && pattern_accepts(filter.db_schema.as_deref(), row.db_schema.as_deref())
                    && pattern_accepts(filter.table_name.as_deref(), row.table.as_deref())
                    && pattern_accepts(filter.column_name.as_deref(), row.column.as_deref())
                    && match (&row.table_type, filter.table_type.is_empty()) {
                        (_, true) | (None, _) => true,
                        (Some(tt), false) => filter
                            .table_type
                            .iter()
                            .any(|want| want.eq_ignore_ascii_case(tt)),
                    }
            })
            .collect();

        debug!(depth = ?depth, rows = rows.len(), "rendering get_objects result");

        let schema = Arc::new(Schema::new(vec![
            Field::new("catalog_name", DataType::Utf8, false),
            Field::new("db_schema_name", DataType::Utf8, true),
            Field::new("table_name", DataType::Utf8, true),
            Field::new("table_type", DataType::Utf8, true),
            Field::new("column_name", DataType::Utf8, true),
        ]));
        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![
                Arc::new(StringArray::from(
                    rows.iter().map(|r| r.catalog.as_str()).collect::<Vec<_>>(),
                )),
                Arc::new(StringArray::from(
                    rows.iter().map(|r| r.db_schema.as_deref()).collect::<Vec<_>>(),
                )),
                Arc::new(StringArray::from(
                    rows.iter().map(|r| r.table.as_deref()).collect::<Vec<_>>(),
                )),
                Arc::new(StringArray::from(
                    rows.iter().map(|r| r.table_type.as_deref()).collect::<Vec<_>>(),
                )),
                Arc::new(StringArray::from(
                    rows.iter().map(|r| r.column.as_deref()).collect::<Vec<_>>(),
                )),
            ],
        )
        .map_err(|e| Error::unknown().message(format!("failed to build objects batch: {e}")))?;
        write_ipc(&schema, &[batch])
    }

    /// Resolve a table's schema and render it as a zero-batch IPC stream.
    pub fn get_table_schema(
        &self,
        info: &SessionInfo,
        catalog: Option<&str>,
        db_schema: Option<&str>,
        table_name: &str,
    ) -> Result<Vec<u8>> {
        let schema = self
            .runtime
            .block_on(self.client.table_schema(info, catalog, db_schema, table_name))?;
        write_ipc(&schema, &[])
    }

    /// Table types supported by the warehouse.
    pub fn get_table_types(&self) -> Result<Vec<u8>> {
        let schema = Arc::new(Schema::new(vec![Field::new(
            "table_type",
            DataType::Utf8,
            false,
        )]));
        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![Arc::new(StringArray::from(vec!["TABLE", "VIEW"]))],
        )
        .map_err(|e| Error::unknown().message(format!("failed to build table types: {e}")))?;
        write_ipc(&schema, &[batch])
    }
}

/// Serialize batches as Arrow IPC stream bytes.
fn write_ipc(schema: &SchemaRef, batches: &[RecordBatch]) -> Result<Vec<u8>> {
    let mut writer = StreamWriter::try_new(Vec::new(), schema)
        .map_err(|e| Error::invalid_data().message(format!("IPC writer: {e}")))?;
    for batch in batches {
        writer
            .write(batch)
            .map_err(|e| Error::invalid_data().message(format!("IPC write: {e}")))?;
    }
    writer
        .finish()
        .map_err(|e| Error::invalid_data().message(format!("IPC finish: {e}")))?;
    writer
        .into_inner()
        .map_err(|e| Error::invalid_data().message(format!("IPC flush: {e}")))
}

/// Apply a SQL LIKE pattern, treating `None`, empty, and `%` as match-all.
///
/// Rows that do not carry the filtered field (shallower depth) pass.
fn pattern_accepts(pattern: Option<&str>, value: Option<&str>) -> bool {
    match (pattern, value) {
        (None, _) | (_, None) => true,
        (Some(p), _) if p.is_empty() || p == "%" => true,
        (Some(p), Some(v)) => like_match(p, v),
    }
}

/// Match a string against a SQL LIKE pattern.
///
/// `%` matches any sequence of characters (including empty), `_` exactly one.
fn like_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();
    like_match_recursive(&pattern, &text, 0, 0)
}

fn like_match_recursive(pattern: &[char], text: &[char], pi: usize, ti: usize) -> bool {
    if pi == pattern.len() {
        return ti == text.len();
    }
    match pattern[pi] {
        '%' => {
            let mut pi = pi;
            while pi < pattern.len() && pattern[pi] == '%' {
                pi += 1;
            }
            for ti in ti..=text.len() {
                if like_match_recursive(pattern, text, pi, ti) {
                    return true;
                }
            }
            false
        }
        '_' => ti < text.len() && like_match_recursive(pattern, text, pi + 1, ti + 1),
        ch => ti < text.len() && text[ti] == ch && like_match_recursive(pattern, text, pi + 1, ti + 1),
    }
}
