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

//! The consumed warehouse interface.
//!
//! This module defines the `WarehouseClient` trait: the only surface through
//! which the core talks to a remote warehouse. The actual wire protocol
//! (auth, query submission, result fetch) lives behind implementations of
//! this trait and is out of scope for the core. Remote failures surface as
//! [`Error`] values carrying the warehouse's vendor_code/sqlstate when the
//! remote envelope provides them.

use crate::error::Result;
use crate::options::OptionValue;
use arrow_array::{RecordBatch, RecordBatchReader};
use arrow_schema::SchemaRef;
use async_trait::async_trait;
use std::collections::HashMap;

/// Configuration snapshot handed to [`WarehouseClient::login`].
///
/// Built at `connectionInit` time from the owning database's options merged
/// with the connection's own (connection keys win). Later changes to the
/// database's options do not affect an existing session.
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    pub options: HashMap<String, OptionValue>,
}

impl SessionConfig {
    pub fn get_string(&self, key: &str) -> Option<&str> {
        self.options.get(key).and_then(OptionValue::as_str)
    }
}

/// An established network session, opaque to the dispatcher.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub session_id: String,
}

/// One query submission: compiled SQL or a Substrait plan, plus any bound
/// parameter batches and per-statement hints.
#[derive(Debug, Clone, Default)]
pub struct QueryRequest {
    pub sql: Option<String>,
    pub substrait_plan: Option<Vec<u8>>,
    pub parameters: Vec<RecordBatch>,
    /// Truthy `borealdb.statement.async_exec` statement option.
    pub async_exec: bool,
}

/// Result of a query: a lazy batch stream plus the rows-affected count.
///
/// `rows_affected` is `-1` for result-producing statements (unknown until
/// the stream is exhausted) and the exact count for DML.
pub struct QueryOutcome {
    pub reader: Box<dyn RecordBatchReader + Send>,
    pub rows_affected: i64,
}

impl std::fmt::Debug for QueryOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryOutcome")
            .field("rows_affected", &self.rows_affected)
            .finish_non_exhaustive()
    }
}

/// A warehouse-side locator for one partition of a result set.
///
/// Opaque to the core; redeemable only on the session that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionToken(pub Vec<u8>);

/// Result of a partitioned execution: no data is materialized locally.
pub struct PartitionOutcome {
    pub schema: SchemaRef,
    pub tokens: Vec<PartitionToken>,
    pub rows_affected: i64,
}

/// Result of preparing a statement.
pub struct PreparedInfo {
    pub parameter_schema: SchemaRef,
}

/// Requested depth of a `connectionGetObjects` listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectDepth {
    All,
    Catalogs,
    Schemas,
    Tables,
    Columns,
}

impl ObjectDepth {
    /// Decode the wire depth value.
    pub fn from_i32(depth: i32) -> Option<Self> {
        match depth {
            0 => Some(ObjectDepth::All),
            1 => Some(ObjectDepth::Catalogs),
            2 => Some(ObjectDepth::Schemas),
            3 => Some(ObjectDepth::Tables),
            4 => Some(ObjectDepth::Columns),
            _ => None,
        }
    }
}

/// One flattened row of the warehouse catalog hierarchy.
///
/// Fields deeper than the listing depth are `None`.
#[derive(Debug, Clone, Default)]
pub struct ObjectRow {
    pub catalog: String,
    pub db_schema: Option<String>,
    pub table: Option<String>,
    pub table_type: Option<String>,
    pub column: Option<String>,
}

/// Abstract interface for warehouse backends.
///
/// Implementations handle protocol-specific details (REST, gRPC, ...). All
/// methods are invoked through the engine's runtime and block the dispatch
/// thread for the full round trip; the core performs no retries of its own
/// (DML is not idempotent), though implementations may reconnect at the
/// transport level.
#[async_trait]
pub trait WarehouseClient: Send + Sync + std::fmt::Debug {
    // --- Session management ---

    /// Authenticate and open a session for the given configuration.
    async fn login(&self, config: &SessionConfig) -> Result<SessionInfo>;

    /// Close a session, releasing server-side resources.
    async fn logout(&self, session: &SessionInfo) -> Result<()>;

    // --- Statement execution ---

    /// Compile the statement server-side and report its parameter schema.
    async fn prepare(&self, session: &SessionInfo, request: &QueryRequest)
        -> Result<PreparedInfo>;

    /// Execute a statement, returning once the schema and first-batch
    /// availability are known.
    async fn execute(&self, session: &SessionInfo, request: QueryRequest) -> Result<QueryOutcome>;

    /// Execute a statement in partitioned form.
    async fn execute_partitioned(
        &self,
        session: &SessionInfo,
        request: QueryRequest,
    ) -> Result<PartitionOutcome>;

    /// Redeem one partition token produced by `execute_partitioned`.
    async fn fetch_partition(
        &self,
        session: &SessionInfo,
        token: &PartitionToken,
    ) -> Result<QueryOutcome>;

    // --- Transactions ---

    async fn commit(&self, session: &SessionInfo) -> Result<()>;

    async fn rollback(&self, session: &SessionInfo) -> Result<()>;

    // --- Catalog metadata ---

    /// List the catalog hierarchy to the requested depth.
    async fn list_objects(
        &self,
        session: &SessionInfo,
        depth: ObjectDepth,
    ) -> Result<Vec<ObjectRow>>;

    /// Resolve the Arrow schema of one table.
    async fn table_schema(
        &self,
        session: &SessionInfo,
        catalog: Option<&str>,
        db_schema: Option<&str>,
        table_name: &str,
    ) -> Result<SchemaRef>;
}
