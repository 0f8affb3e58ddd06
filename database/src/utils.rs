use crate::prelude::DB;
use std::sync::Weak;
use tempfile::TempDir;

#[derive(Default)]
pub struct DbLifetime {
    weak_db_ref: Weak<DB>,
    optional_tempdir: Option<TempDir>,
}

impl DbLifetime {
    pub fn new(tempdir: TempDir, weak_db_ref: Weak<DB>) -> Self {
        Self { optional_tempdir: Some(tempdir), weak_db_ref }
    }

    /// Tracks the DB reference and makes sure all strong refs are cleaned up
    /// but does not remove the DB from disk when dropped.
    pub fn without_destroy(weak_db_ref: Weak<DB>) -> Self {
        Self { optional_tempdir: None, weak_db_ref }
    }
}

impl Drop for DbLifetime {
    fn drop(&mut self) {
        for _ in 0..16 {
            if self.weak_db_ref.strong_count() > 0 {
                // Sometimes another thread is shutting-down and cleaning resources
                std::thread::sleep(std::time::Duration::from_millis(500));
            } else {
                break;
            }
        }
        assert_eq!(self.weak_db_ref.strong_count(), 0, "DB is expected to have no strong references when lifetime is dropped");
        if let Some(dir) = self.optional_tempdir.take() {
            let options = rocksdb::Options::default();
            let path_buf = dir.path().to_owned();
            let path = path_buf.to_str().unwrap();
            <rocksdb::DBWithThreadMode<rocksdb::MultiThreaded>>::destroy(&options, path)
                .expect("DB is expected to be deletable since there are no references to it");
        }
    }
}

pub fn get_trellis_tempdir() -> Result<TempDir, std::io::Error> {
    let global_tempdir = std::env::temp_dir();
    let trellis_tempdir = global_tempdir.join("trellis-rust");
    std::fs::create_dir_all(&trellis_tempdir).map_err(|err| {
        std::io::Error::new(err.kind(), format!("Failed to create trellis directory '{}': {}", trellis_tempdir.display(), err))
    })?;
    tempfile::tempdir_in(&trellis_tempdir).map_err(|err| {
        std::io::Error::new(err.kind(), format!("Failed to create db tempdir in '{}': {}", trellis_tempdir.display(), err))
    })
}

/// Creates a DB within a temp directory under `<OS SPECIFIC TEMP DIR>/trellis-rust`.
/// Callers must keep the `DbLifetime` guard for as long as they wish the DB to exist.
#[macro_export]
macro_rules! create_temp_db {
    ($conn_builder: expr) => {{
        let db_tempdir = $crate::utils::get_trellis_tempdir().unwrap();
        let db_tempdir_path = db_tempdir.path().to_owned();
        $conn_builder
            .with_db_path(db_tempdir_path.clone())
            .build()
            .map(|db| ($crate::utils::DbLifetime::new(db_tempdir, std::sync::Arc::downgrade(&db)), db))
            .map_err(|e| format!("Failed to create temp db at {}: {}", db_tempdir_path.display(), e))
    }};
}
