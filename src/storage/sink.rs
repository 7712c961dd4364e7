use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;

use crate::error::{Error, Result};

/// Parquet file published atomically: rows go to `<dest>.tmp`, which is
/// renamed over `dest` only by [`ParquetSink::publish`]. Dropping an
/// unpublished sink removes the temp file.
pub struct ParquetSink {
    writer: Option<ArrowWriter<File>>,
    tmp: PathBuf,
    dest: PathBuf,
    rows: usize,
}

impl ParquetSink {
    pub fn create(dest: impl Into<PathBuf>, schema: SchemaRef) -> Result<Self> {
        let dest = dest.into();
        let parent = parent_dir(&dest)?;
        std::fs::create_dir_all(parent)?;
        let tmp = tmp_path_for(&dest)?;
        let _ = std::fs::remove_file(&tmp);

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp)?;
        let props = WriterProperties::builder()
            .set_compression(Compression::SNAPPY)
            .build();
        let writer = ArrowWriter::try_new(file, Arc::clone(&schema), Some(props))?;
        Ok(Self {
            writer: Some(writer),
            tmp,
            dest,
            rows: 0,
        })
    }

    pub fn write_batch(&mut self, batch: &RecordBatch) -> Result<()> {
        let Some(writer) = self.writer.as_mut() else {
            return Err(Error::Worker("parquet sink is closed".to_string()));
        };
        writer.write(batch)?;
        self.rows += batch.num_rows();
        Ok(())
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Close the file, fsync it and move it into place. Returns the final path.
    pub fn publish(mut self) -> Result<PathBuf> {
        let Some(writer) = self.writer.take() else {
            return Err(Error::Worker("parquet sink is closed".to_string()));
        };
        let file = writer.into_inner()?;
        file.sync_all()?;
        drop(file);
        std::fs::rename(&self.tmp, &self.dest)?;
        fsync_dir(parent_dir(&self.dest)?)?;
        Ok(self.dest.clone())
    }
}

impl Drop for ParquetSink {
    fn drop(&mut self) {
        if self.writer.take().is_some() {
            let _ = std::fs::remove_file(&self.tmp);
        }
    }
}

fn parent_dir(path: &Path) -> Result<&Path> {
    path.parent()
        .ok_or_else(|| Error::Config(format!("{} has no parent", path.display())))
}

fn tmp_path_for(path: &Path) -> Result<PathBuf> {
    let name = path
        .file_name()
        .ok_or_else(|| Error::Config(format!("missing filename for {}", path.display())))?
        .to_string_lossy();
    Ok(path.with_file_name(format!("{name}.tmp")))
}

fn fsync_dir(path: &Path) -> Result<()> {
    let dir = File::open(path)?;
    dir.sync_all()?;
    Ok(())
}
