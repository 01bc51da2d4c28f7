use std::{
    io::{self, Write},
    str::FromStr,
};

use env_logger::Builder;
use log::LevelFilter;
use tokio::{
    fs::{create_dir_all, metadata, OpenOptions},
    io::{AsyncWriteExt, BufWriter},
    sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender},
    task::JoinHandle,
};

use crate::{config, core::error::FlowResult, core::traits::RunLogger};

const LOG_TARGET: &str = "reqflow";

/// `RunLogger` on top of the `log` facade.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogFacade;

impl RunLogger for LogFacade {
    fn info(&self, msg: &str) {
        log::info!(target: LOG_TARGET, "{msg}");
    }

    fn debug(&self, msg: &str) {
        log::debug!(target: LOG_TARGET, "{msg}");
    }

    fn warn(&self, msg: &str) {
        log::warn!(target: LOG_TARGET, "{msg}");
    }

    fn error(&self, msg: &str) {
        log::error!(target: LOG_TARGET, "{msg}");
    }
}

pub struct AsyncWriter {
    sender: UnboundedSender<Vec<u8>>,
}

impl Write for AsyncWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let data = buf.to_vec();
        self.sender.send(data).map_err(io::Error::other)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Process-wide `env_logger` setup, optionally mirrored into a log file.
pub struct Logger {
    level: LevelFilter,
    file: Option<String>,
}

impl Logger {
    pub fn new(config: Option<&config::Log>, debug: bool) -> Self {
        let configured = config
            .and_then(|log| log.level.as_deref())
            .and_then(|level| LevelFilter::from_str(level).ok());
        let level = match (configured, debug) {
            (Some(level), _) => level,
            (None, true) => LevelFilter::Debug,
            (None, false) => LevelFilter::Info,
        };

        Self {
            level,
            file: config.map(|log| log.path.clone()),
        }
    }

    pub fn level(&self) -> LevelFilter {
        self.level
    }

    /// Install the global logger. With a log file configured, returns the
    /// writer task; it ends once the channel closes.
    pub fn init(self) -> Option<JoinHandle<()>> {
        let mut builder = Builder::from_env(env_logger::Env::default());
        builder.filter(None, self.level);

        let Some(path) = self.file else {
            let _ = builder.try_init();
            return None;
        };

        let (sender, receiver) = unbounded_channel::<Vec<u8>>();
        builder.target(env_logger::Target::Pipe(Box::new(AsyncWriter { sender })));
        if builder.try_init().is_err() {
            return None;
        }

        Some(tokio::spawn(async move {
            if let Err(e) = write_log_file(&path, receiver).await {
                eprintln!("Failed to write log file {path}: {e}");
            }
        }))
    }
}

async fn write_log_file(path: &str, mut receiver: UnboundedReceiver<Vec<u8>>) -> FlowResult<()> {
    if let Some(parent) = std::path::Path::new(path).parent() {
        if !parent.as_os_str().is_empty() && metadata(parent).await.is_err() {
            create_dir_all(parent).await?;
        }
    }

    let mut file = BufWriter::new(
        OpenOptions::new()
            .append(true)
            .create(true)
            .open(path)
            .await?,
    );

    while let Some(data) = receiver.recv().await {
        file.write_all(&data).await?;
        // keep the file readable while the run is in progress
        if receiver.is_empty() {
            file.flush().await?;
        }
    }

    file.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_selection() {
        let log = config::Log {
            path: "/tmp/reqflow-test.log".to_string(),
            level: Some("warn".to_string()),
        };
        assert_eq!(Logger::new(Some(&log), true).level(), LevelFilter::Warn);
        assert_eq!(Logger::new(None, true).level(), LevelFilter::Debug);
        assert_eq!(Logger::new(None, false).level(), LevelFilter::Info);
    }

    #[tokio::test]
    async fn test_write_log_file() {
        let path = std::env::temp_dir()
            .join(format!("reqflow-{}", uuid::Uuid::new_v4()))
            .join("run.log");
        let path_str = path.to_string_lossy().to_string();

        let (sender, receiver) = unbounded_channel();
        let mut writer = AsyncWriter { sender };
        writer.write_all(b"first line\n").unwrap();
        writer.write_all(b"second line\n").unwrap();
        drop(writer);

        write_log_file(&path_str, receiver).await.unwrap();
        let written = std::fs::read_to_string(&path).unwrap();
        assert_eq!(written, "first line\nsecond line\n");
    }
}
