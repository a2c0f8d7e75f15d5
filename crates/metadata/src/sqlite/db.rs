use futures::executor::block_on;
use sqlx::{Connection, Row, SqliteConnection};
use std::{path::Path, sync::Mutex};
use tracing::info;

use mill_pipeline::{EntryState, MetadataError, MetadataStore, NodeId};

/// A [`MetadataStore`] backed by a local SQLite file.
///
/// One connection, guarded by a mutex: the store is shared between
/// node workers, and every call is a single short statement.
pub struct SqliteMetadataStore {
	conn: Mutex<SqliteConnection>,
}

impl SqliteMetadataStore {
	/// Create a new database at `db_file` and initialize the schema.
	pub fn create(db_file: &Path) -> Result<Self, MetadataError> {
		let db_addr = format!("sqlite:{}?mode=rwc", db_file.to_str().unwrap());
		let mut conn =
			block_on(SqliteConnection::connect(&db_addr)).map_err(MetadataError::backend)?;

		block_on(sqlx::query(include_str!("./init.sql")).execute(&mut conn))
			.map_err(MetadataError::backend)?;

		Ok(Self {
			conn: Mutex::new(conn),
		})
	}

	/// Open an existing database.
	pub fn open(db_file: &Path) -> Result<Self, MetadataError> {
		let db_addr = format!("sqlite:{}?mode=rw", db_file.to_str().unwrap());
		let conn =
			block_on(SqliteConnection::connect(&db_addr)).map_err(MetadataError::backend)?;

		Ok(Self {
			conn: Mutex::new(conn),
		})
	}

	fn node_row_id(conn: &mut SqliteConnection, node: &NodeId) -> Result<i64, MetadataError> {
		let res = block_on(
			sqlx::query("SELECT id FROM nodes WHERE name=?;")
				.bind(node.id().as_str())
				.fetch_one(&mut *conn),
		);

		match res {
			Err(sqlx::Error::RowNotFound) => Err(MetadataError::UnknownNode { node: node.clone() }),
			Err(e) => Err(MetadataError::backend(e)),
			Ok(row) => Ok(row.get("id")),
		}
	}

	fn active_run_id(conn: &mut SqliteConnection) -> Result<i64, MetadataError> {
		let res = block_on(
			sqlx::query("SELECT id FROM runs WHERE end_time IS NULL ORDER BY id LIMIT 1;")
				.fetch_one(&mut *conn),
		);

		match res {
			Err(sqlx::Error::RowNotFound) => Err(MetadataError::NoActiveRun),
			Err(e) => Err(MetadataError::backend(e)),
			Ok(row) => Ok(row.get("id")),
		}
	}

	/// Record a metric against the run in progress.
	pub fn log_metric(&self, key: &str, value: f64) -> Result<(), MetadataError> {
		let mut conn = self.conn.lock().unwrap();
		let run_id = Self::active_run_id(&mut conn)?;
		block_on(
			sqlx::query("INSERT INTO metrics (run_id, key, value) VALUES (?, ?, ?);")
				.bind(run_id)
				.bind(key)
				.bind(value)
				.execute(&mut *conn),
		)
		.map_err(MetadataError::backend)?;
		Ok(())
	}

	/// Record a parameter against the run in progress.
	pub fn log_param(&self, key: &str, value: f64) -> Result<(), MetadataError> {
		let mut conn = self.conn.lock().unwrap();
		let run_id = Self::active_run_id(&mut conn)?;
		block_on(
			sqlx::query("INSERT INTO params (run_id, key, value) VALUES (?, ?, ?);")
				.bind(run_id)
				.bind(key)
				.bind(value)
				.execute(&mut *conn),
		)
		.map_err(MetadataError::backend)?;
		Ok(())
	}

	/// Record a tag against the run in progress.
	pub fn set_tag(&self, key: &str, value: &str) -> Result<(), MetadataError> {
		let mut conn = self.conn.lock().unwrap();
		let run_id = Self::active_run_id(&mut conn)?;
		block_on(
			sqlx::query("INSERT INTO tags (run_id, key, value) VALUES (?, ?, ?);")
				.bind(run_id)
				.bind(key)
				.bind(value)
				.execute(&mut *conn),
		)
		.map_err(MetadataError::backend)?;
		Ok(())
	}
}

impl MetadataStore for SqliteMetadataStore {
	fn start_run(&self) -> Result<(), MetadataError> {
		let mut conn = self.conn.lock().unwrap();
		let res = block_on(sqlx::query("INSERT INTO runs DEFAULT VALUES;").execute(&mut *conn))
			.map_err(MetadataError::backend)?;
		info!(
			source = "metadata",
			summary = "Started run",
			run = res.last_insert_rowid(),
		);
		Ok(())
	}

	fn end_run(&self) -> Result<(), MetadataError> {
		let mut conn = self.conn.lock().unwrap();
		let run_id = Self::active_run_id(&mut conn)?;
		block_on(
			sqlx::query("UPDATE runs SET end_time = datetime('now') WHERE id = ?;")
				.bind(run_id)
				.execute(&mut *conn),
		)
		.map_err(MetadataError::backend)?;
		info!(source = "metadata", summary = "Ended run", run = run_id);
		Ok(())
	}

	fn get_run_id(&self) -> Result<i64, MetadataError> {
		let mut conn = self.conn.lock().unwrap();
		Self::active_run_id(&mut conn)
	}

	fn create_resource_tracker(&self, node: &NodeId) -> Result<(), MetadataError> {
		let mut conn = self.conn.lock().unwrap();
		block_on(
			sqlx::query("INSERT INTO nodes (name, type) VALUES (?, 'resource');")
				.bind(node.id().as_str())
				.execute(&mut *conn),
		)
		.map_err(MetadataError::backend)?;
		Ok(())
	}

	fn create_entry(
		&self,
		node: &NodeId,
		location: &str,
		state: EntryState,
		run_id: Option<i64>,
	) -> Result<(), MetadataError> {
		let mut conn = self.conn.lock().unwrap();
		let node_id = Self::node_row_id(&mut conn, node)?;
		block_on(
			sqlx::query(
				"INSERT INTO samples (node_id, location, state, run_id) VALUES (?, ?, ?, ?);",
			)
			.bind(node_id)
			.bind(location)
			.bind(state.as_str())
			.bind(run_id)
			.execute(&mut *conn),
		)
		.map_err(MetadataError::backend)?;
		Ok(())
	}

	fn add_run_id(&self) -> Result<(), MetadataError> {
		let mut conn = self.conn.lock().unwrap();
		let run_id = Self::active_run_id(&mut conn)?;
		block_on(
			sqlx::query(
				"UPDATE samples SET run_id = ?, state = 'current'
				 WHERE run_id IS NULL AND state = 'new';",
			)
			.bind(run_id)
			.execute(&mut *conn),
		)
		.map_err(MetadataError::backend)?;
		Ok(())
	}

	fn add_end_time(&self) -> Result<(), MetadataError> {
		let mut conn = self.conn.lock().unwrap();
		let run_id = Self::active_run_id(&mut conn)?;
		block_on(
			sqlx::query(
				"UPDATE samples SET end_time = datetime('now'), state = 'old'
				 WHERE run_id = ? AND end_time IS NULL;",
			)
			.bind(run_id)
			.execute(&mut *conn),
		)
		.map_err(MetadataError::backend)?;
		Ok(())
	}

	fn get_num_entries(&self, node: &NodeId, state: EntryState) -> Result<i64, MetadataError> {
		let mut conn = self.conn.lock().unwrap();
		let node_id = Self::node_row_id(&mut conn, node)?;
		let row = block_on(
			sqlx::query("SELECT COUNT(*) AS n FROM samples WHERE node_id = ? AND state = ?;")
				.bind(node_id)
				.bind(state.as_str())
				.fetch_one(&mut *conn),
		)
		.map_err(MetadataError::backend)?;
		Ok(row.get("n"))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn store() -> (tempfile::TempDir, SqliteMetadataStore) {
		let dir = tempfile::tempdir().unwrap();
		let store = SqliteMetadataStore::create(&dir.path().join("meta.db")).unwrap();
		(dir, store)
	}

	#[test]
	fn entries_move_through_new_current_old() {
		let (_dir, store) = store();
		let node = NodeId::new("data-store");

		store.create_resource_tracker(&node).unwrap();
		store
			.create_entry(&node, "/data/a.csv", EntryState::New, None)
			.unwrap();
		store
			.create_entry(&node, "/data/b.csv", EntryState::New, None)
			.unwrap();
		assert_eq!(store.get_num_entries(&node, EntryState::New).unwrap(), 2);

		store.start_run().unwrap();
		let run_id = store.get_run_id().unwrap();
		store.add_run_id().unwrap();
		assert_eq!(store.get_num_entries(&node, EntryState::New).unwrap(), 0);
		assert_eq!(
			store.get_num_entries(&node, EntryState::Current).unwrap(),
			2
		);

		store.add_end_time().unwrap();
		store.end_run().unwrap();
		assert_eq!(store.get_num_entries(&node, EntryState::Old).unwrap(), 2);

		// A second run starts numbering where the first left off.
		store.start_run().unwrap();
		assert!(store.get_run_id().unwrap() > run_id);
	}

	#[test]
	fn run_id_requires_an_active_run() {
		let (_dir, store) = store();
		assert!(matches!(
			store.get_run_id(),
			Err(MetadataError::NoActiveRun)
		));
	}

	#[test]
	fn unknown_nodes_are_rejected() {
		let (_dir, store) = store();
		let node = NodeId::new("ghost");
		assert!(matches!(
			store.create_entry(&node, "/x", EntryState::New, None),
			Err(MetadataError::UnknownNode { .. })
		));
	}

	#[test]
	fn metrics_params_and_tags_attach_to_the_run() {
		let (_dir, store) = store();
		assert!(store.log_metric("loss", 0.25).is_err());

		store.start_run().unwrap();
		store.log_metric("loss", 0.25).unwrap();
		store.log_param("lr", 0.001).unwrap();
		store.set_tag("model", "baseline").unwrap();
	}

	#[test]
	fn reopen_preserves_state() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("meta.db");
		let node = NodeId::new("data-store");

		{
			let store = SqliteMetadataStore::create(&path).unwrap();
			store.create_resource_tracker(&node).unwrap();
			store
				.create_entry(&node, "/data/a.csv", EntryState::New, None)
				.unwrap();
		}

		let store = SqliteMetadataStore::open(&path).unwrap();
		assert_eq!(store.get_num_entries(&node, EntryState::New).unwrap(), 1);
	}
}
