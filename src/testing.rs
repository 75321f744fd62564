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

//! An in-process [`WarehouseClient`] for tests.
//!
//! `MockWarehouse` implements the full client trait against fixed data with
//! no network. Behavior is keyed off the SQL text, so tests can trigger each
//! path deterministically:
//!
//! * `SELECT ...` returns one batch with a single `Int64` column `v`.
//! * `INSERT`/`UPDATE`/`DELETE` return an empty stream and an exact
//!   rows-affected count of 3.
//! * `SYNTAX ERROR` fails with `INVALID_ARGUMENT` plus a vendor code and
//!   sqlstate, exercising remote-error passthrough.

use crate::client::{
    ObjectDepth, ObjectRow, PartitionOutcome, PartitionToken, PreparedInfo, QueryOutcome,
    QueryRequest, SessionConfig, SessionInfo, WarehouseClient,
};
use crate::error::{Error, Result};
use arrow_array::{Int64Array, RecordBatch, RecordBatchIterator, RecordBatchReader};
use arrow_schema::{DataType, Field, Schema, SchemaRef};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Mock rows-affected count for DML statements.
pub const MOCK_DML_ROWS: i64 = 3;

#[derive(Debug, Default)]
pub struct MockWarehouse {
    sessions: Mutex<HashSet<String>>,
    next_session: AtomicU64,
    pub commits: AtomicU64,
    pub rollbacks: AtomicU64,
    /// Parameter batches carried by the most recent execute call.
    pub last_parameters: Mutex<Vec<RecordBatch>>,
}

impl MockWarehouse {
    pub fn new() -> Self {
        Self::default()
    }

    fn check_session(&self, session: &SessionInfo) -> Result<()> {
        let sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        if sessions.contains(&session.session_id) {
            Ok(())
        } else {
            Err(Error::invalid_state()
                .message(format!("session {} is closed", session.session_id)))
        }
    }

    fn result_schema() -> SchemaRef {
        Arc::new(Schema::new(vec![Field::new("v", DataType::Int64, false)]))
    }

    fn select_outcome(values: Vec<i64>) -> QueryOutcome {
        let schema = Self::result_schema();
        let batch = RecordBatch::try_new(schema.clone(), vec![Arc::new(Int64Array::from(values))])
            .unwrap_or_else(|_| RecordBatch::new_empty(schema.clone()));
        QueryOutcome {
            reader: Box::new(RecordBatchIterator::new(vec![Ok(batch)], schema)),
            rows_affected: -1,
        }
    }

    fn empty_outcome(rows_affected: i64) -> QueryOutcome {
        let schema = Arc::new(Schema::empty());
        let reader: Box<dyn RecordBatchReader + Send> =
            Box::new(RecordBatchIterator::new(Vec::new(), schema));
        QueryOutcome {
            reader,
            rows_affected,
        }
    }

    fn sql_of(request: &QueryRequest) -> Result<&str> {
        match (&request.sql, &request.substrait_plan) {
            (Some(sql), _) => Ok(sql.as_str()),
            // Plans behave like a SELECT against the fixed result table.
            (None, Some(_)) => Ok("SELECT 1"),
            (None, None) => {
                Err(Error::invalid_state().message("no query or plan set on the statement"))
            }
        }
    }
}

#[async_trait]
impl WarehouseClient for MockWarehouse {
    async fn login(&self, config: &SessionConfig) -> Result<SessionInfo> {
        let Some(user) = config.get_string("user") else {
            return Err(Error::unauthenticated().message("option 'user' is required"));
        };
        if config.get_string("password") == Some("wrong") {
            return Err(Error::unauthenticated()
                .message(format!("authentication failed for user '{user}'"))
                .vendor_code(390100)
                .sqlstate("28000"));
        }
        let n = self.next_session.fetch_add(1, Ordering::Relaxed);
        let session_id = format!("mock-session-{n}");
        self.sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(session_id.clone());
        Ok(SessionInfo { session_id })
    }

    async fn logout(&self, session: &SessionInfo) -> Result<()> {
        self.check_session(session)?;
        self.sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&session.session_id);
        Ok(())
    }

    async fn prepare(
        &self,
        session: &SessionInfo,
        request: &QueryRequest,
    ) -> Result<PreparedInfo> {
        self.check_session(session)?;
        let sql = Self::sql_of(request)?;
        if sql.starts_with("SYNTAX") {
            return Err(Error::invalid_argument()
                .message("SQL compilation error")
                .vendor_code(1003)
                .sqlstate("42000"));
        }
        // One Int64 parameter per '?' placeholder.
        let fields: Vec<Field> = sql
            .matches('?')
            .enumerate()
            .map(|(i, _)| Field::new(format!("param_{}", i + 1), DataType::Int64, true))
            .collect();
        Ok(PreparedInfo {
            parameter_schema: Arc::new(Schema::new(fields)),
        })
    }

    async fn execute(&self, session: &SessionInfo, request: QueryRequest) -> Result<QueryOutcome> {
        self.check_session(session)?;
        *self.last_parameters.lock().unwrap_or_else(|e| e.into_inner()) =
            request.parameters.clone();
        let sql = Self::sql_of(&request)?;
        if sql.starts_with("SYNTAX") {
            return Err(Error::invalid_argument()
                .message("SQL compilation error")
                .vendor_code(1003)
                .sqlstate("42000"));
        }
        if sql.starts_with("INSERT") || sql.starts_with("UPDATE") || sql.starts_with("DELETE") {
            return Ok(Self::empty_outcome(MOCK_DML_ROWS));
        }
        Ok(Self::select_outcome(vec![1]))
    }

    async fn execute_partitioned(
        &self,
        session: &SessionInfo,
        request: QueryRequest,
    ) -> Result<PartitionOutcome> {
        self.check_session(session)?;
        *self.last_parameters.lock().unwrap_or_else(|e| e.into_inner()) =
            request.parameters.clone();
        Self::sql_of(&request)?;
        Ok(PartitionOutcome {
            schema: Self::result_schema(),
            tokens: vec![
                PartitionToken(b"part-0".to_vec()),
                PartitionToken(b"part-1".to_vec()),
            ],
            rows_affected: -1,
        })
    }

    async fn fetch_partition(
        &self,
        session: &SessionInfo,
        token: &PartitionToken,
    ) -> Result<QueryOutcome> {
        self.check_session(session)?;
        match token.0.as_slice() {
            b"part-0" => Ok(Self::select_outcome(vec![1])),
            b"part-1" => Ok(Self::select_outcome(vec![2])),
            _ => Err(Error::not_found().message("unknown partition token")),
        }
    }

    async fn commit(&self, session: &SessionInfo) -> Result<()> {
        self.check_session(session)?;
        self.commits.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn rollback(&self, session: &SessionInfo) -> Result<()> {
        self.check_session(session)?;
        self.rollbacks.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn list_objects(
        &self,
        session: &SessionInfo,
        depth: ObjectDepth,
    ) -> Result<Vec<ObjectRow>> {
        self.check_session(session)?;
        // Fixed catalog tree: main.public.{events TABLE, metrics_view VIEW},
        // events has columns id and ts.
        let rows = match depth {
            ObjectDepth::Catalogs => vec![ObjectRow {
                catalog: "main".into(),
                ..Default::default()
            }],
            ObjectDepth::Schemas => vec![ObjectRow {
                catalog: "main".into(),
                db_schema: Some("public".into()),
                ..Default::default()
            }],
            ObjectDepth::Tables => vec![
                ObjectRow {
                    catalog: "main".into(),
                    db_schema: Some("public".into()),
                    table: Some("events".into()),
                    table_type: Some("TABLE".into()),
                    ..Default::default()
                },
                ObjectRow {
                    catalog: "main".into(),
                    db_schema: Some("public".into()),
                    table: Some("metrics_view".into()),
                    table_type: Some("VIEW".into()),
                    ..Default::default()
                },
            ],
            ObjectDepth::All | ObjectDepth::Columns => vec![
                ObjectRow {
                    catalog: "main".into(),
                    db_schema: Some("public".into()),
                    table: Some("events".into()),
                    table_type: Some("TABLE".into()),
                    column: Some("id".into()),
                },
                ObjectRow {
                    catalog: "main".into(),
                    db_schema: Some("public".into()),
                    table: Some("events".into()),
                    table_type: Some("TABLE".into()),
                    column: Some("ts".into()),
                },
                ObjectRow {
                    catalog: "main".into(),
                    db_schema: Some("public".into()),
                    table: Some("metrics_view".into()),
                    table_type: Some("VIEW".into()),
                    column: Some("v".into()),
                },
            ],
        };
        Ok(rows)
    }

    async fn table_schema(
        &self,
        session: &SessionInfo,
        _catalog: Option<&str>,
        _db_schema: Option<&str>,
        table_name: &str,
    ) -> Result<SchemaRef> {
        self.check_session(session)?;
        match table_name {
            "events" => Ok(Arc::new(Schema::new(vec![
                Field::new("id", DataType::Int64, false),
                Field::new("ts", DataType::Utf8, true),
            ]))),
            _ => Err(Error::not_found().message(format!("table '{table_name}' does not exist"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StatusCode;
    use crate::options::OptionValue;

    fn config_with_user() -> SessionConfig {
        let mut config = SessionConfig::default();
        config
            .options
            .insert("user".into(), OptionValue::String("alice".into()));
        config
    }

    #[tokio::test]
    async fn test_login_requires_user() {
        let mock = MockWarehouse::new();
        let err = mock.login(&SessionConfig::default()).await.unwrap_err();
        assert_eq!(err.status, StatusCode::Unauthenticated);

        let session = mock.login(&config_with_user()).await.unwrap();
        assert!(session.session_id.starts_with("mock-session-"));
    }

    #[tokio::test]
    async fn test_closed_session_rejected() {
        let mock = MockWarehouse::new();
        let session = mock.login(&config_with_user()).await.unwrap();
        mock.logout(&session).await.unwrap();
        let err = mock.commit(&session).await.unwrap_err();
        assert_eq!(err.status, StatusCode::InvalidState);
    }

    #[tokio::test]
    async fn test_select_and_dml() {
        let mock = MockWarehouse::new();
        let session = mock.login(&config_with_user()).await.unwrap();

        let outcome = mock
            .execute(
                &session,
                QueryRequest {
                    sql: Some("SELECT 1".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(outcome.rows_affected, -1);

        let outcome = mock
            .execute(
                &session,
                QueryRequest {
                    sql: Some("DELETE FROM events".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(outcome.rows_affected, MOCK_DML_ROWS);
    }

    #[tokio::test]
    async fn test_vendor_error_passthrough() {
        let mock = MockWarehouse::new();
        let session = mock.login(&config_with_user()).await.unwrap();
        let err = mock
            .execute(
                &session,
                QueryRequest {
                    sql: Some("SYNTAX ERROR".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::InvalidArgument);
        assert_eq!(err.vendor_code, Some(1003));
        assert_eq!(err.sqlstate.as_deref(), Some("42000"));
    }
}
