use std::io::{self, Write};

use env_logger::Builder;
use tokio::{
    fs::{create_dir_all, metadata, OpenOptions},
    io::{AsyncWriteExt, BufWriter},
    sync::{
        mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender},
        watch,
    },
};

use crate::{
    config,
    core::{ErrorContext, ManagerError, ManagerResult},
};

pub struct AsyncWriter {
    sender: UnboundedSender<Vec<u8>>,
}

impl Write for AsyncWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let data = buf.to_vec();
        self.sender
            .send(data)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Log setup for an embedding application.
///
/// Without a configured path records go to stderr. With one, records are
/// queued by [`AsyncWriter`] and appended to the file by [`Logger::run`].
pub struct Logger {
    sender: UnboundedSender<Vec<u8>>,
    receiver: UnboundedReceiver<Vec<u8>>,
    config: config::Log,
}

impl Logger {
    pub fn new(config: config::Log) -> Self {
        let (sender, receiver) = unbounded_channel::<Vec<u8>>();
        Self {
            sender,
            receiver,
            config,
        }
    }

    fn create_async_writer(&self) -> AsyncWriter {
        AsyncWriter {
            sender: self.sender.clone(),
        }
    }

    pub fn init_env_logger(&self) -> ManagerResult<()> {
        let mut builder = Builder::from_env(env_logger::Env::default());
        builder.filter(None, self.config.level.into());
        if self.config.path.is_some() {
            let writer = self.create_async_writer();
            builder.target(env_logger::Target::Pipe(Box::new(writer)));
        }
        builder
            .try_init()
            .map_err(|e| ManagerError::Configuration(format!("Unable to install logger: {e}")))
    }

    /// Append queued records to the log file until `shutdown` flips to true.
    /// Records queued before the signal are still written.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> ManagerResult<()> {
        let Some(log_file_path) = self.config.path.clone() else {
            return Ok(());
        };

        if let Some(parent) = std::path::Path::new(&log_file_path).parent() {
            if metadata(parent).await.is_err() {
                create_dir_all(parent)
                    .await
                    .with_context("Failed to create log path")?;
            }
        }

        let mut file = BufWriter::new(
            OpenOptions::new()
                .append(true)
                .create(true)
                .open(&log_file_path)
                .await
                .with_context("Failed to open or create log file")?,
        );

        loop {
            tokio::select! {
                biased;
                // Shutdown signal handling
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        log::info!("Shutdown signal received, stopping write log");
                        break;
                    }
                },

                data = self.receiver.recv() => {
                    match data {
                        Some(data) => {
                            if let Err(e) = file.write_all(&data).await {
                                log::error!("Failed to write to log file: {}", e);
                            }
                        }
                        None => {
                            log::info!("Log channel closed, stopping write log");
                            break;
                        }
                    }
                }
            }
        }

        while let Ok(data) = self.receiver.try_recv() {
            if let Err(e) = file.write_all(&data).await {
                log::error!("Failed to write to log file: {}", e);
            }
        }

        file.flush().await?;
        Ok(())
    }
}
