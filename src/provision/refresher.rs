/// Periodic dependency refresh
///
/// A background thread that, on every tick, installs the configured
/// requirements and rebuilds each staging area. Failures are logged and the
/// next tick tries again.
use super::LanguageStaging;
use crossbeam_channel::{select, Sender};
use log::{error, info};
use std::thread::{self, JoinHandle};
use std::time::Duration;

#[derive(Debug)]
pub struct DependencyRefresher {
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl DependencyRefresher {
    pub fn start(interval: Duration, targets: Vec<LanguageStaging>) -> Self {
        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(0);
        let ticker = crossbeam_channel::tick(interval);

        let handle = thread::spawn(move || {
            info!(
                "Started dependency refresher ({} languages, every {:?})",
                targets.len(),
                interval
            );
            loop {
                select! {
                    recv(stop_rx) -> _ => break,
                    recv(ticker) -> _ => {
                        for target in &targets {
                            match target.refresh() {
                                Ok(()) => info!("{} dependencies refreshed", target.language()),
                                Err(e) => error!(
                                    "failed to refresh {} dependencies: {}",
                                    target.language(),
                                    e
                                ),
                            }
                        }
                    },
                }
            }
            info!("Dependency refresher stopped");
        });

        Self {
            stop: Some(stop_tx),
            handle: Some(handle),
        }
    }

    /// Stop the thread and wait for an in-progress refresh to finish.
    pub fn shutdown(mut self) {
        self.stop_and_join();
    }

    fn stop_and_join(&mut self) {
        drop(self.stop.take());
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("dependency refresher panicked");
            }
        }
    }
}

impl Drop for DependencyRefresher {
    fn drop(&mut self) {
        self.stop_and_join();
    }
}
