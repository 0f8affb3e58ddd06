use crate::db::DB;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Copy, Clone)]
pub struct Unspecified;

#[derive(Debug, Clone)]
pub struct ConnBuilder<Path: Clone> {
    db_path: Path,
    create_if_missing: bool,
    parallelism: usize,
    files_limit: i32,
    mem_budget: usize,
}

impl Default for ConnBuilder<Unspecified> {
    fn default() -> Self {
        ConnBuilder { db_path: Unspecified, create_if_missing: true, parallelism: 1, files_limit: 500, mem_budget: 64 * 1024 * 1024 }
    }
}

impl<Path: Clone> ConnBuilder<Path> {
    pub fn with_db_path(self, db_path: PathBuf) -> ConnBuilder<PathBuf> {
        ConnBuilder {
            db_path,
            create_if_missing: self.create_if_missing,
            parallelism: self.parallelism,
            files_limit: self.files_limit,
            mem_budget: self.mem_budget,
        }
    }
    pub fn with_create_if_missing(self, create_if_missing: bool) -> ConnBuilder<Path> {
        ConnBuilder { create_if_missing, ..self }
    }
    pub fn with_parallelism(self, parallelism: impl Into<usize>) -> ConnBuilder<Path> {
        ConnBuilder { parallelism: parallelism.into(), ..self }
    }
    pub fn with_files_limit(self, files_limit: impl Into<i32>) -> ConnBuilder<Path> {
        ConnBuilder { files_limit: files_limit.into(), ..self }
    }
    pub fn with_mem_budget(self, mem_budget: impl Into<usize>) -> ConnBuilder<Path> {
        ConnBuilder { mem_budget: mem_budget.into(), ..self }
    }
}

impl ConnBuilder<PathBuf> {
    pub fn build(self) -> Result<Arc<DB>, rocksdb::Error> {
        let mut opts = rocksdb::Options::default();
        if self.parallelism > 1 {
            opts.increase_parallelism(self.parallelism as i32);
        }
        opts.optimize_level_style_compaction(self.mem_budget);
        opts.create_if_missing(self.create_if_missing);
        opts.set_max_open_files(self.files_limit);
        Ok(Arc::new(DB::open(&opts, &self.db_path)?))
    }
}
