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

//! Request dispatch: handle validation, lifecycle rules, and session calls.
//!
//! Every canonical [`Call`] funnels through [`CoreDispatcher::dispatch`].
//! Handles are validated before anything else; the session object behind a
//! handle is locked for the duration of its operation, so concurrent calls
//! against the same handle serialize while calls against distinct handles
//! proceed in parallel.
//!
//! Lock ordering: a statement's session lock may be taken before a brief
//! look at its owning connection, never the other way around. Connection
//! release snapshots its state and drops the connection lock before touching
//! any child statement.

use crate::client::{ObjectDepth, QueryRequest, SessionConfig, SessionInfo, WarehouseClient};
use crate::codec::{Call, Response};
use crate::error::{Error, Result};
use crate::handle::{Handle, HandleKind, HandleTable};
use crate::interchange::{self, SchemaExport, StreamExport};
use crate::options::{
    OptionValue, CONNECTION_SEALED_KEYS, DATABASE_SEALED_KEYS, OPT_ASYNC_EXEC, OPT_AUTOCOMMIT,
    STATEMENT_SEALED_KEYS,
};
use crate::session::{
    ConnectionSession, DatabaseSession, NetworkSession, ObjectFilter, PartitionSet, SessionEngine,
    StatementSession,
};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// The single entry point behind every guest runtime.
pub struct CoreDispatcher {
    engine: SessionEngine,
    databases: HandleTable<DatabaseSession>,
    connections: HandleTable<ConnectionSession>,
    statements: HandleTable<StatementSession>,
}

impl CoreDispatcher {
    pub fn new(client: Arc<dyn WarehouseClient>) -> Result<Self> {
        Ok(CoreDispatcher {
            engine: SessionEngine::new(client)?,
            databases: HandleTable::new(HandleKind::Database),
            connections: HandleTable::new(HandleKind::Connection),
            statements: HandleTable::new(HandleKind::Statement),
        })
    }

    /// Route one canonical call to its typed operation.
    pub fn dispatch(&self, call: Call) -> Result<Response> {
        match call {
            Call::DatabaseNew => Ok(Response::Handle(self.database_new())),
            Call::DatabaseSetOption { handle, key, value } => self
                .database_set_option(handle, key, value)
                .map(|_| Response::Unit),
            Call::DatabaseInit { handle } => self.database_init(handle).map(|_| Response::Unit),
            Call::DatabaseRelease { handle } => {
                self.database_release(handle).map(|_| Response::Unit)
            }

            Call::ConnectionNew => Ok(Response::Handle(self.connection_new())),
            Call::ConnectionSetOption { handle, key, value } => self
                .connection_set_option(handle, key, value)
                .map(|_| Response::Unit),
            Call::ConnectionInit { handle, database } => {
                self.connection_init(handle, database).map(|_| Response::Unit)
            }
            Call::ConnectionRelease { handle } => {
                self.connection_release(handle).map(|_| Response::Unit)
            }
            Call::ConnectionGetInfo { handle, codes } => {
                self.connection_get_info(handle, &codes).map(Response::Bytes)
            }
            Call::ConnectionGetObjects {
                handle,
                depth,
                catalog,
                db_schema,
                table_name,
                table_type,
                column_name,
            } => self
                .connection_get_objects(
                    handle,
                    depth,
                    ObjectFilter {
                        catalog,
                        db_schema,
                        table_name,
                        table_type,
                        column_name,
                    },
                )
                .map(Response::Bytes),
            Call::ConnectionGetTableSchema {
                handle,
                catalog,
                db_schema,
                table_name,
            } => self
                .connection_get_table_schema(handle, catalog, db_schema, table_name)
                .map(Response::Bytes),
            Call::ConnectionGetTableTypes { handle } => {
                self.connection_get_table_types(handle).map(Response::Bytes)
            }
            Call::ConnectionCommit { handle } => {
                self.connection_commit(handle).map(|_| Response::Unit)
            }
            Call::ConnectionRollback { handle } => {
                self.connection_rollback(handle).map(|_| Response::Unit)
            }

            Call::StatementNew { connection } => {
                self.statement_new(connection).map(Response::Handle)
            }
            Call::StatementSetOption { handle, key, value } => self
                .statement_set_option(handle, key, value)
                .map(|_| Response::Unit),
            Call::StatementRelease { handle } => {
                self.statement_release(handle).map(|_| Response::Unit)
            }
            Call::StatementSetSqlQuery { handle, query } => {
                self.statement_set_sql_query(handle, query).map(|_| Response::Unit)
            }
            Call::StatementSetSubstraitPlan { handle, plan } => self
                .statement_set_substrait_plan(handle, plan)
                .map(|_| Response::Unit),
            Call::StatementBind {
                handle,
                schema,
                array,
            } => self.statement_bind(handle, &schema, &array).map(|_| Response::Unit),
            Call::StatementBindStream { handle, stream } => {
                self.statement_bind_stream(handle, &stream).map(|_| Response::Unit)
            }
            Call::StatementPrepare { handle } => {
                self.statement_prepare(handle).map(|_| Response::Unit)
            }
            Call::StatementGetParameterSchema { handle } => self
                .statement_get_parameter_schema(handle)
                .map(Response::SchemaPtr),
            Call::StatementExecuteQuery { handle } => self.statement_execute_query(handle),
            Call::StatementExecuteUpdate { handle } => {
                self.statement_execute_update(handle).map(Response::RowCount)
            }
            Call::StatementExecutePartitions { handle } => {
                self.statement_execute_partitions(handle)
            }
            Call::StatementReadPartition { handle, descriptor } => {
                self.statement_read_partition(handle, &descriptor)
            }
        }
    }

    // --- Database ---

    pub fn database_new(&self) -> Handle {
        self.databases.allocate(DatabaseSession::new())
    }

    pub fn database_set_option(
        &self,
        handle: Handle,
        key: String,
        value: OptionValue,
    ) -> Result<()> {
        let db = self.databases.validate(handle)?;
        let mut db = lock(&db);
        let sealed = db.initialized;
        db.options.set(key, value, sealed, DATABASE_SEALED_KEYS)
    }

    pub fn database_init(&self, handle: Handle) -> Result<()> {
        let db = self.databases.validate(handle)?;
        let mut db = lock(&db);
        if db.initialized {
            return Err(Error::invalid_state().message("database is already initialized"));
        }
        crate::logging::init_from_options(&db.options);
        db.initialized = true;
        debug!(id = handle.id, "database initialized");
        Ok(())
    }

    pub fn database_release(&self, handle: Handle) -> Result<()> {
        self.databases.free(handle).map(|_| ())
    }

    // --- Connection ---

    pub fn connection_new(&self) -> Handle {
        self.connections.allocate(ConnectionSession::new())
    }

    pub fn connection_set_option(
        &self,
        handle: Handle,
        key: String,
        value: OptionValue,
    ) -> Result<()> {
        let conn = self.connections.validate(handle)?;
        let mut conn = lock(&conn);
        let sealed = conn.initialized;

        if key == OPT_AUTOCOMMIT && conn.initialized {
            let enable = value.truthy();
            // Re-enabling autocommit ends the open transaction by committing.
            if enable && !conn.autocommit {
                let info = conn.network()?.info.clone();
                self.engine.commit(&info)?;
            }
            conn.autocommit = enable;
        }
        conn.options.set(key, value, sealed, CONNECTION_SEALED_KEYS)
    }

    pub fn connection_init(&self, handle: Handle, database: Handle) -> Result<()> {
        let db = self.databases.validate(database)?;
        let conn = self.connections.validate(handle)?;
        let mut conn = lock(&conn);
        if conn.initialized {
            return Err(Error::invalid_state().message("connection is already initialized"));
        }

        // Snapshot: database options first, connection options win on clash.
        // Later database option changes do not affect this connection.
        let mut config = SessionConfig::default();
        {
            let db = lock(&db);
            if !db.initialized {
                return Err(Error::invalid_state().message("database is not initialized"));
            }
            for (key, value) in db.options.iter() {
                config.options.insert(key.clone(), value.clone());
            }
        }
        for (key, value) in conn.options.iter() {
            config.options.insert(key.clone(), value.clone());
        }

        let info = self.engine.connect(&config)?;
        debug!(id = handle.id, session = %info.session_id, "connection initialized");
        conn.autocommit = conn
            .options
            .get(OPT_AUTOCOMMIT)
            .map(OptionValue::truthy)
            .unwrap_or(true);
        conn.network = Some(NetworkSession { info, config });
        conn.owning_database = Some(database);
        conn.initialized = true;
        Ok(())
    }

    /// Release a connection, eagerly invalidating its child statements.
    ///
    /// The slot is freed first, so the handle (and its children) reject new
    /// calls even if the warehouse logout then fails.
    pub fn connection_release(&self, handle: Handle) -> Result<()> {
        let conn = self.connections.free(handle)?;
        let (statements, network) = {
            let mut conn = lock(&conn);
            (std::mem::take(&mut conn.statements), conn.network.take())
        };

        for statement in statements {
            match self.statements.free(statement) {
                Ok(st) => lock(&st).discard_result(),
                // Already released individually.
                Err(_) => continue,
            }
        }

        if let Some(network) = network {
            self.engine.disconnect(&network.info)?;
        }
        Ok(())
    }

    pub fn connection_get_info(&self, handle: Handle, codes: &[u32]) -> Result<Vec<u8>> {
        self.connections.validate(handle)?;
        self.engine.get_info(codes)
    }

    pub fn connection_get_objects(
        &self,
        handle: Handle,
        depth: i32,
        filter: ObjectFilter,
    ) -> Result<Vec<u8>> {
        let depth = ObjectDepth::from_i32(depth)
            .ok_or_else(|| Error::invalid_argument().message(format!("invalid depth {depth}")))?;
        let info = self.connection_session(handle)?;
        self.engine.get_objects(&info, depth, &filter)
    }

    pub fn connection_get_table_schema(
        &self,
        handle: Handle,
        catalog: Option<String>,
        db_schema: Option<String>,
        table_name: String,
    ) -> Result<Vec<u8>> {
        if table_name.is_empty() {
            return Err(Error::invalid_argument().message("table name must not be empty"));
        }
        let info = self.connection_session(handle)?;
        self.engine
            .get_table_schema(&info, catalog.as_deref(), db_schema.as_deref(), &table_name)
    }

    pub fn connection_get_table_types(&self, handle: Handle) -> Result<Vec<u8>> {
        self.connections.validate(handle)?;
        self.engine.get_table_types()
    }

    pub fn connection_commit(&self, handle: Handle) -> Result<()> {
        let info = self.transaction_session(handle)?;
        self.engine.commit(&info)
    }

    pub fn connection_rollback(&self, handle: Handle) -> Result<()> {
        let info = self.transaction_session(handle)?;
        self.engine.rollback(&info)
    }

    /// The network session of an initialized connection.
    fn connection_session(&self, handle: Handle) -> Result<SessionInfo> {
        let conn = self.connections.validate(handle)?;
        let conn = lock(&conn);
        Ok(conn.network()?.info.clone())
    }

    /// Like [`Self::connection_session`], but also requires manual-commit mode.
    fn transaction_session(&self, handle: Handle) -> Result<SessionInfo> {
        let conn = self.connections.validate(handle)?;
        let conn = lock(&conn);
        if conn.autocommit {
            return Err(Error::invalid_state()
                .message("no active transaction: connection is in autocommit mode"));
        }
        Ok(conn.network()?.info.clone())
    }

    // --- Statement ---

    pub fn statement_new(&self, connection: Handle) -> Result<Handle> {
        let conn = self.connections.validate(connection)?;
        let mut conn = lock(&conn);
        conn.network()?;
        let handle = self.statements.allocate(StatementSession::new(connection));
        conn.statements.push(handle);
        Ok(handle)
    }

    pub fn statement_set_option(
        &self,
        handle: Handle,
        key: String,
        value: OptionValue,
    ) -> Result<()> {
        let st = self.statements.validate(handle)?;
        let mut st = lock(&st);
        st.options.set(key, value, false, STATEMENT_SEALED_KEYS)
    }

    pub fn statement_release(&self, handle: Handle) -> Result<()> {
        let st = self.statements.free(handle)?;
        let owner = {
            let mut st = lock(&st);
            st.discard_result();
            st.owning_connection
        };
        // Unregister from the parent, which may itself be gone already.
        if let Some(owner) = owner {
            if let Ok(conn) = self.connections.validate(owner) {
                lock(&conn).statements.retain(|h| *h != handle);
            }
        }
        Ok(())
    }

    pub fn statement_set_sql_query(&self, handle: Handle, query: String) -> Result<()> {
        let st = self.statements.validate(handle)?;
        lock(&st).set_query(query);
        Ok(())
    }

    pub fn statement_set_substrait_plan(&self, handle: Handle, plan: Vec<u8>) -> Result<()> {
        if plan.is_empty() {
            return Err(Error::invalid_argument().message("Substrait plan must not be empty"));
        }
        let st = self.statements.validate(handle)?;
        lock(&st).set_plan(plan);
        Ok(())
    }

    /// Bind one parameter batch, replacing any previous binding.
    ///
    /// Both Arrow structs are imported (and thus released) here even if a
    /// later step fails.
    pub fn statement_bind(&self, handle: Handle, schema: &[u8], array: &[u8]) -> Result<()> {
        let st = self.statements.validate(handle)?;
        let batch = interchange::import_batch(schema, array)?;
        lock(&st).bound = vec![batch];
        Ok(())
    }

    /// Bind a parameter stream, replacing any previous binding.
    ///
    /// The stream is drained eagerly so the caller's structure can be
    /// released before this call returns.
    pub fn statement_bind_stream(&self, handle: Handle, stream: &[u8]) -> Result<()> {
        let st = self.statements.validate(handle)?;
        let reader = interchange::import_stream(stream)?;
        let mut batches = Vec::new();
        for batch in reader {
            batches.push(batch.map_err(|e| {
                Error::invalid_data().message(format!("bound parameter stream failed: {e}"))
            })?);
        }
        lock(&st).bound = batches;
        Ok(())
    }

    pub fn statement_prepare(&self, handle: Handle) -> Result<()> {
        let st = self.statements.validate(handle)?;
        let mut st = lock(&st);
        if st.prepared {
            return Ok(());
        }
        let info = self.statement_session(&st)?;
        let request = query_request(&st, Vec::new())?;
        let prepared = self.engine.prepare(&info, &request)?;
        st.parameter_schema = Some(prepared.parameter_schema);
        st.prepared = true;
        Ok(())
    }

    pub fn statement_get_parameter_schema(&self, handle: Handle) -> Result<Vec<u8>> {
        let st = self.statements.validate(handle)?;
        let st = lock(&st);
        let schema = st.parameter_schema.as_ref().ok_or_else(|| {
            Error::invalid_state().message("statement is not prepared")
        })?;
        Ok(SchemaExport::new(schema)?.into_blob())
    }

    pub fn statement_execute_query(&self, handle: Handle) -> Result<Response> {
        let st = self.statements.validate(handle)?;
        let mut st = lock(&st);
        let info = self.statement_session(&st)?;
        st.discard_result();
        let parameters = std::mem::take(&mut st.bound);
        let request = query_request(&st, parameters)?;
        let outcome = self.engine.execute(&info, request)?;
        Ok(Response::Execute {
            stream: StreamExport::new(outcome.reader).into_blob(),
            rows_affected: outcome.rows_affected,
        })
    }

    pub fn statement_execute_update(&self, handle: Handle) -> Result<i64> {
        let st = self.statements.validate(handle)?;
        let mut st = lock(&st);
        let info = self.statement_session(&st)?;
        st.discard_result();
        let parameters = std::mem::take(&mut st.bound);
        let request = query_request(&st, parameters)?;
        let outcome = self.engine.execute(&info, request)?;
        // The result stream, if any, is dropped unread.
        Ok(outcome.rows_affected)
    }

    pub fn statement_execute_partitions(&self, handle: Handle) -> Result<Response> {
        let st = self.statements.validate(handle)?;
        let mut st = lock(&st);
        let info = self.statement_session(&st)?;
        st.discard_result();
        let parameters = std::mem::take(&mut st.bound);
        let request = query_request(&st, parameters)?;
        let outcome = self.engine.execute_partitioned(&info, request)?;

        let set = PartitionSet::new(outcome.schema, outcome.tokens);
        let partitions: Vec<Vec<u8>> = (0..set.tokens.len() as u64)
            .map(|i| set.descriptor(i))
            .collect();
        let schema = SchemaExport::new(&set.schema)?.into_blob();
        let rows_affected = outcome.rows_affected;
        st.partitions = Some(set);
        Ok(Response::Partitions {
            schema,
            partitions,
            rows_affected,
        })
    }

    pub fn statement_read_partition(&self, handle: Handle, descriptor: &[u8]) -> Result<Response> {
        let st = self.statements.validate(handle)?;
        let st = lock(&st);
        let info = self.statement_session(&st)?;
        let set = st.partitions.as_ref().ok_or_else(|| {
            Error::invalid_state().message("statement has no partitioned result")
        })?;
        let token = set.resolve(descriptor)?.clone();
        let outcome = self.engine.fetch_partition(&info, &token)?;
        Ok(Response::Execute {
            stream: StreamExport::new(outcome.reader).into_blob(),
            rows_affected: outcome.rows_affected,
        })
    }

    /// The network session of a statement's owning connection.
    ///
    /// Takes a brief connection lock while the statement lock is held; see
    /// the module doc for the ordering rule.
    fn statement_session(&self, st: &StatementSession) -> Result<SessionInfo> {
        let owner = st.owning_connection.ok_or_else(|| {
            Error::invalid_state().message("statement has no owning connection")
        })?;
        self.connection_session(owner).map_err(|e| {
            warn!(error = %e, "statement's owning connection is unusable");
            e
        })
    }
}

/// Assemble the request for one submission from statement state.
fn query_request(st: &StatementSession, parameters: Vec<arrow_array::RecordBatch>) -> Result<QueryRequest> {
    if st.query.is_none() && st.substrait_plan.is_none() {
        return Err(Error::invalid_state().message("no query or plan set on the statement"));
    }
    Ok(QueryRequest {
        sql: st.query.clone(),
        substrait_plan: st.substrait_plan.clone(),
        parameters,
        async_exec: st
            .options
            .get(OPT_ASYNC_EXEC)
            .map(OptionValue::truthy)
            .unwrap_or(false),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StatusCode;
    use crate::testing::{MockWarehouse, MOCK_DML_ROWS};
    use arrow_array::ffi::to_ffi;
    use arrow_array::{Array, Int64Array, RecordBatch, RecordBatchIterator, StructArray};
    use arrow_schema::{DataType, Field, Schema};

    fn dispatcher() -> CoreDispatcher {
        CoreDispatcher::new(Arc::new(MockWarehouse::new())).unwrap()
    }

    fn open_connection(d: &CoreDispatcher) -> (Handle, Handle) {
        let db = d.database_new();
        d.database_set_option(
            db,
            "uri".into(),
            OptionValue::String("boreal://test".into()),
        )
        .unwrap();
        d.database_init(db).unwrap();

        let conn = d.connection_new();
        d.connection_set_option(conn, "user".into(), OptionValue::String("alice".into()))
            .unwrap();
        d.connection_init(conn, db).unwrap();
        (db, conn)
    }

    fn parameter_schema() -> Arc<Schema> {
        Arc::new(Schema::new(vec![Field::new("p", DataType::Int64, true)]))
    }

    /// Export one parameter batch the way a guest runtime would, yielding
    /// the (schema, array) pointer blobs statementBind takes.
    fn export_batch(values: Vec<i64>) -> (Vec<u8>, Vec<u8>) {
        let batch = RecordBatch::try_new(
            parameter_schema(),
            vec![Arc::new(Int64Array::from(values))],
        )
        .unwrap();
        let data = StructArray::from(batch).to_data();
        let (array, ffi_schema) = to_ffi(&data).unwrap();
        (
            interchange::encode_pointer(Box::into_raw(Box::new(ffi_schema)) as u64),
            interchange::encode_pointer(Box::into_raw(Box::new(array)) as u64),
        )
    }

    fn read_stream_values(blob: &[u8]) -> Vec<i64> {
        let reader = interchange::import_stream(blob).unwrap();
        let mut values = Vec::new();
        for batch in reader {
            let batch = batch.unwrap();
            let col = batch.column(0).as_any().downcast_ref::<Int64Array>().unwrap();
            values.extend(col.iter().flatten());
        }
        values
    }

    #[test]
    fn test_execute_query_round_trip() {
        let d = dispatcher();
        let (_db, conn) = open_connection(&d);
        let st = d.statement_new(conn).unwrap();
        d.statement_set_sql_query(st, "SELECT 1".into()).unwrap();

        let response = d.statement_execute_query(st).unwrap();
        let Response::Execute {
            stream,
            rows_affected,
        } = response
        else {
            panic!("expected Execute response");
        };
        assert_eq!(rows_affected, -1);
        assert_eq!(read_stream_values(&stream), vec![1]);
    }

    #[test]
    fn test_execute_update_returns_exact_count() {
        let d = dispatcher();
        let (_db, conn) = open_connection(&d);
        let st = d.statement_new(conn).unwrap();
        d.statement_set_sql_query(st, "DELETE FROM events".into())
            .unwrap();
        assert_eq!(d.statement_execute_update(st).unwrap(), MOCK_DML_ROWS);
    }

    #[test]
    fn test_bind_replaces_and_is_consumed_by_execute() {
        let mock = Arc::new(MockWarehouse::new());
        let d = CoreDispatcher::new(mock.clone()).unwrap();
        let (_db, conn) = open_connection(&d);
        let st = d.statement_new(conn).unwrap();
        d.statement_set_sql_query(st, "SELECT ?".into()).unwrap();

        // Rebinding replaces the first batch outright.
        let (schema, array) = export_batch(vec![7]);
        d.statement_bind(st, &schema, &array).unwrap();
        let (schema, array) = export_batch(vec![8, 9]);
        d.statement_bind(st, &schema, &array).unwrap();

        let Response::Execute { stream, .. } = d.statement_execute_query(st).unwrap() else {
            panic!("expected Execute response");
        };
        read_stream_values(&stream);

        {
            let seen = mock.last_parameters.lock().unwrap();
            assert_eq!(seen.len(), 1);
            let col = seen[0]
                .column(0)
                .as_any()
                .downcast_ref::<Int64Array>()
                .unwrap();
            assert_eq!(col.iter().flatten().collect::<Vec<_>>(), vec![8, 9]);
        }

        // The binding is consumed: the next execute carries no parameters.
        let Response::Execute { stream, .. } = d.statement_execute_query(st).unwrap() else {
            panic!("expected Execute response");
        };
        read_stream_values(&stream);
        assert!(mock.last_parameters.lock().unwrap().is_empty());
    }

    #[test]
    fn test_bind_stream_drains_all_batches() {
        let mock = Arc::new(MockWarehouse::new());
        let d = CoreDispatcher::new(mock.clone()).unwrap();
        let (_db, conn) = open_connection(&d);
        let st = d.statement_new(conn).unwrap();
        d.statement_set_sql_query(st, "SELECT ?".into()).unwrap();

        let schema = parameter_schema();
        let batches = vec![
            RecordBatch::try_new(
                schema.clone(),
                vec![Arc::new(Int64Array::from(vec![1i64]))],
            )
            .unwrap(),
            RecordBatch::try_new(
                schema.clone(),
                vec![Arc::new(Int64Array::from(vec![2i64, 3]))],
            )
            .unwrap(),
        ];
        let reader = RecordBatchIterator::new(batches.into_iter().map(Ok), schema);
        let blob = interchange::StreamExport::new(Box::new(reader)).into_blob();
        d.statement_bind_stream(st, &blob).unwrap();

        let Response::Execute { stream, .. } = d.statement_execute_query(st).unwrap() else {
            panic!("expected Execute response");
        };
        read_stream_values(&stream);

        let seen = mock.last_parameters.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].num_rows(), 1);
        assert_eq!(seen[1].num_rows(), 2);
    }

    #[test]
    fn test_execute_without_query_fails() {
        let d = dispatcher();
        let (_db, conn) = open_connection(&d);
        let st = d.statement_new(conn).unwrap();
        let err = d.statement_execute_query(st).unwrap_err();
        assert_eq!(err.status, StatusCode::InvalidState);
    }

    #[test]
    fn test_connection_init_requires_initialized_database() {
        let d = dispatcher();
        let db = d.database_new();
        let conn = d.connection_new();
        d.connection_set_option(conn, "user".into(), OptionValue::String("alice".into()))
            .unwrap();
        let err = d.connection_init(conn, db).unwrap_err();
        assert_eq!(err.status, StatusCode::InvalidState);
    }

    #[test]
    fn test_login_failure_leaves_connection_uninitialized() {
        let d = dispatcher();
        let db = d.database_new();
        d.database_init(db).unwrap();
        let conn = d.connection_new();
        // No user option: the mock rejects the login.
        let err = d.connection_init(conn, db).unwrap_err();
        assert_eq!(err.status, StatusCode::Unauthenticated);

        // The connection is still usable after fixing the options.
        d.connection_set_option(conn, "user".into(), OptionValue::String("alice".into()))
            .unwrap();
        d.connection_init(conn, db).unwrap();
    }

    #[test]
    fn test_release_cascades_to_statements() {
        let d = dispatcher();
        let (_db, conn) = open_connection(&d);
        let st = d.statement_new(conn).unwrap();

        d.connection_release(conn).unwrap();

        let err = d.statement_set_sql_query(st, "SELECT 1".into()).unwrap_err();
        assert_eq!(err.status, StatusCode::InvalidState);
        let err = d.connection_commit(conn).unwrap_err();
        assert_eq!(err.status, StatusCode::InvalidState);
    }

    #[test]
    fn test_statement_release_unregisters_from_parent() {
        let d = dispatcher();
        let (_db, conn) = open_connection(&d);
        let st = d.statement_new(conn).unwrap();
        d.statement_release(st).unwrap();
        let err = d.statement_release(st).unwrap_err();
        assert_eq!(err.status, StatusCode::InvalidState);
        // Connection release must not trip over the already-freed child.
        d.connection_release(conn).unwrap();
    }

    #[test]
    fn test_commit_requires_manual_mode() {
        let d = dispatcher();
        let (_db, conn) = open_connection(&d);
        let err = d.connection_commit(conn).unwrap_err();
        assert_eq!(err.status, StatusCode::InvalidState);

        d.connection_set_option(conn, OPT_AUTOCOMMIT.into(), OptionValue::String("false".into()))
            .unwrap();
        d.connection_commit(conn).unwrap();
        d.connection_rollback(conn).unwrap();
    }

    #[test]
    fn test_sealed_connection_option_after_init() {
        let d = dispatcher();
        let (_db, conn) = open_connection(&d);
        let err = d
            .connection_set_option(conn, "user".into(), OptionValue::String("bob".into()))
            .unwrap_err();
        assert_eq!(err.status, StatusCode::InvalidState);
    }

    #[test]
    fn test_prepare_and_parameter_schema() {
        let d = dispatcher();
        let (_db, conn) = open_connection(&d);
        let st = d.statement_new(conn).unwrap();
        d.statement_set_sql_query(st, "SELECT * FROM events WHERE id = ? AND ts > ?".into())
            .unwrap();

        let err = d.statement_get_parameter_schema(st).unwrap_err();
        assert_eq!(err.status, StatusCode::InvalidState);

        d.statement_prepare(st).unwrap();
        // Idempotent.
        d.statement_prepare(st).unwrap();

        let blob = d.statement_get_parameter_schema(st).unwrap();
        let addr = interchange::decode_pointer(&blob).unwrap();
        let ffi = unsafe {
            arrow_schema::ffi::FFI_ArrowSchema::from_raw(
                addr as *mut arrow_schema::ffi::FFI_ArrowSchema,
            )
        };
        let schema = arrow_schema::Schema::try_from(&ffi).unwrap();
        assert_eq!(schema.fields().len(), 2);

        // Changing the query drops the compiled state.
        d.statement_set_sql_query(st, "SELECT 1".into()).unwrap();
        let err = d.statement_get_parameter_schema(st).unwrap_err();
        assert_eq!(err.status, StatusCode::InvalidState);
    }

    #[test]
    fn test_partition_flow() {
        let d = dispatcher();
        let (_db, conn) = open_connection(&d);
        let st = d.statement_new(conn).unwrap();
        d.statement_set_sql_query(st, "SELECT v FROM events".into())
            .unwrap();

        let Response::Partitions {
            schema, partitions, ..
        } = d.statement_execute_partitions(st).unwrap()
        else {
            panic!("expected Partitions response");
        };
        assert_eq!(partitions.len(), 2);

        // Reclaim the exported schema.
        let addr = interchange::decode_pointer(&schema).unwrap();
        drop(unsafe {
            arrow_schema::ffi::FFI_ArrowSchema::from_raw(
                addr as *mut arrow_schema::ffi::FFI_ArrowSchema,
            )
        });

        let Response::Execute { stream, .. } =
            d.statement_read_partition(st, &partitions[1]).unwrap()
        else {
            panic!("expected Execute response");
        };
        assert_eq!(read_stream_values(&stream), vec![2]);

        // Re-executing invalidates the old descriptors.
        let old = partitions[0].clone();
        let Response::Partitions { schema, .. } = d.statement_execute_partitions(st).unwrap()
        else {
            panic!("expected Partitions response");
        };
        let addr = interchange::decode_pointer(&schema).unwrap();
        drop(unsafe {
            arrow_schema::ffi::FFI_ArrowSchema::from_raw(
                addr as *mut arrow_schema::ffi::FFI_ArrowSchema,
            )
        });
        let err = d.statement_read_partition(st, &old).unwrap_err();
        assert_eq!(err.status, StatusCode::NotFound);
    }

    #[test]
    fn test_get_objects_depth_validation() {
        let d = dispatcher();
        let (_db, conn) = open_connection(&d);
        let err = d
            .connection_get_objects(conn, 9, ObjectFilter::default())
            .unwrap_err();
        assert_eq!(err.status, StatusCode::InvalidArgument);
        assert!(d
            .connection_get_objects(conn, 3, ObjectFilter::default())
            .is_ok());
    }

    #[test]
    fn test_handle_kind_confusion_rejected() {
        let d = dispatcher();
        let (_db, conn) = open_connection(&d);
        let bogus = Handle {
            kind: HandleKind::Statement,
            ..conn
        };
        let err = d.statement_set_sql_query(bogus, "SELECT 1".into()).unwrap_err();
        // Same id/magic under the wrong table cannot validate.
        assert!(matches!(
            err.status,
            StatusCode::InvalidState | StatusCode::NotFound
        ));
    }
}
