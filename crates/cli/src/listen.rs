use collector::{
    channel::create_fifo,
    reader::{TraceReader, TraceSummary},
};
use std::{fs::File, path::Path};
use tracing::{debug, info, warn};

/// Read a whole trace from `path` and summarize it.
///
/// A missing `path` is created as a FIFO first and removed again afterwards
/// unless `keep` is set. Opening blocks until a producer attaches.
pub fn listen(path: &Path, keep: bool) -> Result<TraceSummary, collector::Error> {
    let created = if path.exists() {
        false
    } else {
        create_fifo(path)?;
        debug!(?path, "fifo created");
        true
    };

    let summary = read(path);

    if created && !keep {
        if let Err(error) = std::fs::remove_file(path) {
            warn!(?path, %error, "failed to remove fifo");
        }
    }
    summary
}

fn read(path: &Path) -> Result<TraceSummary, collector::Error> {
    info!(?path, "waiting for producer");
    let file = File::open(path).map_err(|source| collector::Error::Open {
        path: path.to_owned(),
        source,
    })?;
    let reader = TraceReader::new(file)?;
    info!(images = reader.header().images().len(), "header received");
    let summary = reader.summarize()?;
    info!(
        records = summary.records,
        terminal = ?summary.terminal,
        "trace complete"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use collector::{Header, Record};
    use pretty_assertions::assert_eq;
    use std::{fs::OpenOptions, io::Write, thread, time::Duration};
    use tempfile::tempdir;

    fn produce(path: &Path, records: &[Record]) -> thread::JoinHandle<()> {
        let path = path.to_owned();
        let mut bytes = Header::new(vec!["libfoo".into(), "app".into()])
            .unwrap()
            .encode();
        for record in records {
            bytes.extend_from_slice(&record.encode());
        }
        thread::spawn(move || {
            for _ in 0..500 {
                if path.exists() {
                    break;
                }
                thread::sleep(Duration::from_millis(10));
            }
            let mut file = OpenOptions::new().write(true).open(&path).unwrap();
            file.write_all(&bytes).unwrap();
        })
    }

    #[test]
    fn created_fifo_is_removed_afterwards() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("trace.fifo");
        let producer = produce(
            &path,
            &[
                Record::Block { image: 1, offset: 0x10 },
                Record::Block { image: 1, offset: 0x20 },
                Record::Terminal(11),
            ],
        );

        let summary = listen(&path, false).unwrap();
        producer.join().unwrap();

        assert_eq!(summary.images[0].hits, 0);
        assert_eq!(summary.images[1].hits, 2);
        assert_eq!(summary.terminal, Some(11));
        assert!(summary.crashed());
        assert!(!path.exists());
    }

    #[test]
    fn kept_fifo_stays() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("kept.fifo");
        let producer = produce(&path, &[]);

        let summary = listen(&path, true).unwrap();
        producer.join().unwrap();

        assert_eq!(summary.records, 0);
        assert!(path.exists());
    }

    #[test]
    fn recorded_file_is_read_as_is() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("trace.bin");
        let mut bytes = Header::new(vec!["app".into()]).unwrap().encode();
        bytes.extend_from_slice(&Record::Terminal(0xC).encode());
        std::fs::write(&path, bytes).unwrap();

        let summary = listen(&path, false).unwrap();
        assert!(summary.timed_out());
        assert!(path.exists(), "only fifos created here are removed");
    }
}
