//! A mock bench, useful to test the link without actual serial ports.
//!
//! Ports can be plugged and unplugged, and lines "sent" by the device of an open link.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use futures::{future::BoxFuture, FutureExt};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::{
    error::Error,
    ports::{PortDescriptor, PortEnumerator},
    serial::SerialMessageBytes,
    transport::{LinkIo, LinkSignal, Transport},
};

#[derive(Debug)]
struct MockLink {
    signals: mpsc::UnboundedSender<LinkSignal>,
    writes: mpsc::UnboundedReceiver<SerialMessageBytes>,
    written: Vec<SerialMessageBytes>,
}

impl MockLink {
    fn drain(&mut self) {
        while let Ok(bytes) = self.writes.try_recv() {
            self.written.push(bytes);
        }
    }
}

#[derive(Debug, Default)]
struct Bench {
    ports: Vec<PortDescriptor>,
    enumeration_failure: Option<String>,
    refused: HashMap<String, String>,
    open_delay: Option<Duration>,
    links: HashMap<String, MockLink>,
    opens: usize,
}

/// Pretend serial hardware.
///
/// Implements both [`PortEnumerator`] and [`Transport`].
/// Clones share the same bench.
#[derive(Debug, Default, Clone)]
pub struct MockBench(Arc<Mutex<Bench>>);

impl MockBench {
    /// An empty bench.
    pub fn new() -> Self {
        Self::default()
    }

    fn bench(&self) -> MutexGuard<'_, Bench> {
        // A test panicking while holding the lock poisons it; the state is still usable.
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Make a port appear.
    pub fn plug(&self, port: PortDescriptor) {
        info!(%port, "Plugged");
        let mut bench = self.bench();
        bench.ports.retain(|p| p.path != port.path);
        bench.ports.push(port);
    }

    /// Make a port disappear.
    /// An open link to it reports [`LinkSignal::Closed`].
    pub fn unplug(&self, path: &str) {
        info!(%path, "Unplugged");
        let mut bench = self.bench();
        bench.ports.retain(|p| p.path != path);

        if let Some(link) = bench.links.remove(path) {
            let _ = link.signals.send(LinkSignal::Closed);
        }
    }

    /// Make an open link fail.
    pub fn break_link(&self, path: &str, problem: &str) {
        if let Some(link) = self.bench().links.remove(path) {
            let _ = link.signals.send(LinkSignal::Error(problem.into()));
        }
    }

    /// Make listing ports fail, or work again with `None`.
    pub fn fail_enumeration(&self, problem: Option<&str>) {
        self.bench().enumeration_failure = problem.map(String::from);
    }

    /// Make opening this path fail.
    pub fn refuse_open(&self, path: &str, problem: &str) {
        self.bench().refused.insert(path.into(), problem.into());
    }

    /// Make opening take some time.
    pub fn delay_open(&self, delay: Duration) {
        self.bench().open_delay = Some(delay);
    }

    /// The device on an open link sends a line.
    /// Returns false if there is no open link to the path.
    pub fn emit(&self, path: &str, line: &str) -> bool {
        self.bench()
            .links
            .get(path)
            .map_or(false, |link| link.signals.send(LinkSignal::Line(line.into())).is_ok())
    }

    /// Whether the other side of a link to the path is still held.
    pub fn is_open(&self, path: &str) -> bool {
        self.bench()
            .links
            .get(path)
            .map_or(false, |link| !link.signals.is_closed())
    }

    /// Everything written to the path since it was last opened.
    pub fn written(&self, path: &str) -> Vec<SerialMessageBytes> {
        self.bench()
            .links
            .get_mut(path)
            .map(|link| {
                link.drain();
                link.written.clone()
            })
            .unwrap_or_default()
    }

    /// How many links were opened in total.
    pub fn opens(&self) -> usize {
        self.bench().opens
    }

    fn open_now(&self, path: &str) -> Result<LinkIo, Error> {
        let mut bench = self.bench();

        if let Some(problem) = bench.refused.get(path) {
            return Err(Error::Open {
                path: path.into(),
                problem: problem.clone(),
            });
        }

        if !bench.ports.iter().any(|port| port.path == path) {
            return Err(Error::Open {
                path: path.into(),
                problem: "No such device".into(),
            });
        }

        let (writer, writes) = mpsc::unbounded_channel();
        let (signal_sender, signals) = mpsc::unbounded_channel();

        bench.links.insert(
            path.into(),
            MockLink {
                signals: signal_sender,
                writes,
                written: vec![],
            },
        );
        bench.opens += 1;
        debug!(%path, "Mock link open");

        Ok(LinkIo {
            writer,
            signals,
            task: None,
        })
    }
}

impl PortEnumerator for MockBench {
    fn list_ports(&self) -> BoxFuture<'static, Result<Vec<PortDescriptor>, Error>> {
        let bench = self.bench();

        let result = match &bench.enumeration_failure {
            Some(problem) => Err(Error::Enumeration(problem.clone())),
            None => Ok(bench.ports.clone()),
        };

        futures::future::ready(result).boxed()
    }
}

impl Transport for MockBench {
    fn open(&self, path: String, _baud_rate: u32) -> BoxFuture<'static, Result<LinkIo, Error>> {
        let delay = self.bench().open_delay;
        let bench = self.clone();

        match delay {
            None => futures::future::ready(bench.open_now(&path)).boxed(),
            Some(delay) => async move {
                tokio::time::sleep(delay).await;
                bench.open_now(&path)
            }
            .boxed(),
        }
    }
}
