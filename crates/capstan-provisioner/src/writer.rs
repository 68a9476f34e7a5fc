//! Per-task log writers
//!
//! Every task writes human-readable progress to its own durable sink, named
//! after the task identity. The factory seam keeps the provisioner testable
//! and lets embedders redirect output.

use capstan_workflow::TaskOut;
use std::path::PathBuf;
use std::sync::Arc;

/// Opens a progress sink for a task id
pub type WriterFactory = Arc<dyn Fn(&str) -> std::io::Result<TaskOut> + Send + Sync>;

/// Log file name for a task id.
pub fn make_file_name(task_id: &str) -> String {
    format!("{task_id}.log")
}

/// Writer factory appending to `<dir>/<task-id>.log`.
pub fn file_writer_factory(dir: impl Into<PathBuf>) -> WriterFactory {
    let dir = dir.into();
    Arc::new(move |task_id| {
        std::fs::create_dir_all(&dir)?;
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join(make_file_name(task_id)))?;
        Ok(Box::new(tokio::fs::File::from_std(file)) as TaskOut)
    })
}

/// Writer factory that discards all output.
pub fn sink_writer_factory() -> WriterFactory {
    Arc::new(|_| Ok(Box::new(tokio::io::sink()) as TaskOut))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[test]
    fn test_make_file_name() {
        assert_eq!(make_file_name("abcd1234"), "abcd1234.log");
    }

    #[tokio::test]
    async fn test_file_writer_factory_appends() {
        let dir = std::env::temp_dir().join(format!("capstan-writer-{}", std::process::id()));
        let factory = file_writer_factory(&dir);

        {
            let mut out = factory("task1").unwrap();
            out.write_all(b"first\n").await.unwrap();
            out.flush().await.unwrap();
        }
        {
            let mut out = factory("task1").unwrap();
            out.write_all(b"second\n").await.unwrap();
            out.flush().await.unwrap();
        }

        let text = std::fs::read_to_string(dir.join("task1.log")).unwrap();
        assert_eq!(text, "first\nsecond\n");

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn test_sink_writer_factory() {
        let factory = sink_writer_factory();
        let mut out = factory("anything").unwrap();
        out.write_all(b"dropped").await.unwrap();
    }
}
