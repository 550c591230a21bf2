//! Packet observers.
//!
//! An [`Entity`](crate::Entity) reports every packet it sends or receives to
//! one [`PacketObserver`]. Which observer is used is decided once, when the
//! node is built.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::{Mutex, PoisonError};

use serde::Serialize;
use tracing::{debug, warn};
use zerotouch_core::{encoding, Data, Interest, Name};

use crate::error::Result;

/// Packet direction relative to the observing node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Received
    In,
    /// Sent
    Out,
}

/// Receives a callback for every packet crossing a node's face
pub trait PacketObserver: Send + Sync {
    /// An interest crossed the face
    fn on_interest(&self, direction: Direction, interest: &Interest);

    /// A data packet crossed the face
    fn on_data(&self, direction: Direction, data: &Data);
}

/// Logs packets through `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl PacketObserver for TracingObserver {
    fn on_interest(&self, direction: Direction, interest: &Interest) {
        match direction {
            Direction::In => debug!(name = %interest.name(), "received an interest"),
            Direction::Out => debug!(name = %interest.name(), "sent out an interest"),
        }
    }

    fn on_data(&self, direction: Direction, data: &Data) {
        match direction {
            Direction::In => debug!(name = %data.name(), "received a data"),
            Direction::Out => debug!(name = %data.name(), "sent out a data"),
        }
    }
}

#[derive(Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
enum TraceRecord<'a> {
    Interest {
        direction: Direction,
        packet: &'a Interest,
    },
    Data {
        direction: Direction,
        packet: &'a Data,
    },
}

/// Appends CBOR-encoded packets to a file, and logs them like
/// [`TracingObserver`]
#[derive(Debug)]
pub struct FileTrace {
    out: Mutex<BufWriter<File>>,
}

impl FileTrace {
    /// Open (or create) `path` for appending
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            out: Mutex::new(BufWriter::new(file)),
        })
    }

    fn write(&self, record: &TraceRecord<'_>) {
        let bytes = match encoding::encode(record) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "cannot encode packet for trace");
                return;
            }
        };
        let mut out = self.out.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = out.write_all(&bytes).and_then(|()| out.flush()) {
            warn!(error = %e, "cannot write packet trace");
        }
    }
}

impl PacketObserver for FileTrace {
    fn on_interest(&self, direction: Direction, interest: &Interest) {
        TracingObserver.on_interest(direction, interest);
        self.write(&TraceRecord::Interest {
            direction,
            packet: interest,
        });
    }

    fn on_data(&self, direction: Direction, data: &Data) {
        TracingObserver.on_data(direction, data);
        self.write(&TraceRecord::Data {
            direction,
            packet: data,
        });
    }
}

/// One observed packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PacketEvent {
    /// Interest with its direction
    Interest(Direction, Interest),
    /// Data with its direction
    Data(Direction, Data),
}

impl PacketEvent {
    /// Name of the packet
    #[must_use]
    pub const fn name(&self) -> &Name {
        match self {
            Self::Interest(_, i) => i.name(),
            Self::Data(_, d) => d.name(),
        }
    }

    /// Direction of the packet
    #[must_use]
    pub const fn direction(&self) -> Direction {
        match self {
            Self::Interest(d, _) | Self::Data(d, _) => *d,
        }
    }
}

/// Keeps every packet in memory
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<PacketEvent>>,
}

impl RecordingObserver {
    /// Create an empty recorder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything seen so far
    pub fn events(&self) -> Vec<PacketEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Interests sent so far
    pub fn interests_out(&self) -> Vec<Interest> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                PacketEvent::Interest(Direction::Out, i) => Some(i),
                _ => None,
            })
            .collect()
    }

    /// Data packets sent so far
    pub fn data_out(&self) -> Vec<Data> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                PacketEvent::Data(Direction::Out, d) => Some(d),
                _ => None,
            })
            .collect()
    }

    fn push(&self, event: PacketEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}

impl PacketObserver for RecordingObserver {
    fn on_interest(&self, direction: Direction, interest: &Interest) {
        self.push(PacketEvent::Interest(direction, interest.clone()));
    }

    fn on_data(&self, direction: Direction, data: &Data) {
        self.push(PacketEvent::Data(direction, data.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_observer() {
        let recorder = RecordingObserver::new();
        let interest = Interest::new("/a/b".parse().unwrap());
        recorder.on_interest(Direction::Out, &interest);
        recorder.on_data(Direction::In, &Data::new("/a/b/v=1".parse().unwrap()));

        assert_eq!(recorder.events().len(), 2);
        assert_eq!(recorder.interests_out(), vec![interest]);
        assert!(recorder.data_out().is_empty());
        assert_eq!(recorder.events()[1].direction(), Direction::In);
    }

    #[test]
    fn test_file_trace_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("packets.cbor");
        let trace = FileTrace::open(&path).unwrap();
        trace.on_interest(Direction::Out, &Interest::new("/a".parse().unwrap()));
        let first = std::fs::metadata(&path).unwrap().len();
        assert!(first > 0);

        trace.on_data(Direction::In, &Data::new("/a/v=1".parse().unwrap()));
        assert!(std::fs::metadata(&path).unwrap().len() > first);
    }
}
