//! Contact trace: time-windowed, directional contacts between nodes.

use std::io;

use oppnet_core::{NodeId, Timestamp};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::LoadError;

/// One proximity window. The observer runs the exchange against the observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub observer: NodeId,
    pub observed: NodeId,
    pub start: Timestamp,
    pub end: Timestamp,
}

impl Contact {
    pub fn new(observer: NodeId, observed: NodeId, start: Timestamp, end: Timestamp) -> Self {
        Self {
            observer,
            observed,
            start,
            end,
        }
    }

    pub fn duration(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TraceError {
    #[error("trace has no nodes")]
    NoNodes,
    #[error("sample time must be greater than zero")]
    ZeroSampleTime,
    #[error("trace start {start} is after its end {end}")]
    InvertedBounds { start: Timestamp, end: Timestamp },
    #[error("contact {index} references node {node}, trace has {nodes} nodes")]
    DanglingNode {
        index: usize,
        node: NodeId,
        nodes: usize,
    },
    #[error("contact {index} starts at {start} after it ends at {end}")]
    InvertedContact {
        index: usize,
        start: Timestamp,
        end: Timestamp,
    },
    #[error("contact {index} connects node {node} with itself")]
    SelfContact { index: usize, node: NodeId },
}

/// Validated contact trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trace {
    node_count: usize,
    start_time: Timestamp,
    end_time: Timestamp,
    sample_time: u64,
    contacts: Vec<Contact>,
}

impl Trace {
    /// Build a trace, rejecting anything the driver could not run safely.
    pub fn new(
        node_count: usize,
        start_time: Timestamp,
        end_time: Timestamp,
        sample_time: u64,
        contacts: Vec<Contact>,
    ) -> Result<Self, TraceError> {
        if node_count == 0 {
            return Err(TraceError::NoNodes);
        }
        if sample_time == 0 {
            return Err(TraceError::ZeroSampleTime);
        }
        if start_time > end_time {
            return Err(TraceError::InvertedBounds {
                start: start_time,
                end: end_time,
            });
        }
        for (index, contact) in contacts.iter().enumerate() {
            for node in [contact.observer, contact.observed] {
                if node >= node_count {
                    return Err(TraceError::DanglingNode {
                        index,
                        node,
                        nodes: node_count,
                    });
                }
            }
            if contact.observer == contact.observed {
                return Err(TraceError::SelfContact {
                    index,
                    node: contact.observer,
                });
            }
            if contact.start > contact.end {
                return Err(TraceError::InvertedContact {
                    index,
                    start: contact.start,
                    end: contact.end,
                });
            }
        }
        Ok(Self {
            node_count,
            start_time,
            end_time,
            sample_time,
            contacts,
        })
    }

    /// Read `observer,observed,start,end` rows (with a header line).
    pub fn from_csv_reader<R: io::Read>(
        reader: R,
        node_count: usize,
        start_time: Timestamp,
        end_time: Timestamp,
        sample_time: u64,
    ) -> Result<Self, LoadError> {
        let mut csv = csv::Reader::from_reader(reader);
        let contacts = csv
            .deserialize::<Contact>()
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(node_count, start_time, end_time, sample_time, contacts)?)
    }

    pub fn node_count(&self) -> usize {
        self.node_count
    }

    pub fn start_time(&self) -> Timestamp {
        self.start_time
    }

    pub fn end_time(&self) -> Timestamp {
        self.end_time
    }

    pub fn sample_time(&self) -> u64 {
        self.sample_time
    }

    /// Contacts in insertion order.
    pub fn contacts(&self) -> &[Contact] {
        &self.contacts
    }

    pub fn get(&self, index: usize) -> Option<&Contact> {
        self.contacts.get(index)
    }

    pub fn len(&self) -> usize {
        self.contacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contacts.is_empty()
    }

    /// Contact indices ordered by start time, insertion order on ties.
    pub(crate) fn activation_order(&self) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.contacts.len()).collect();
        order.sort_by_key(|&i| (self.contacts[i].start, i));
        order
    }
}
