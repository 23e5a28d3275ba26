//! One node: a program, its relations and a transport, advanced one tick at
//! a time. A tick never waits on the network.

use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::{
    error::{ConfigError, SchemaError},
    eval::{self, Outbound},
    inspect::Inspector,
    program::Program,
    store::{Relation, RelationKind, RelationStore},
    transport::{Envelope, Inbox, Transport},
    value::{Tuple, Value},
};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub tick: u64,
    /// Inbound tuples stored into Channel relations.
    pub accepted: usize,
    /// Inbound tuples dropped for naming an unknown relation or failing its schema.
    pub rejected: usize,
    pub derived: usize,
    pub merged: usize,
    pub retracted: usize,
    /// Tuples handed to the transport.
    pub sent: usize,
}

pub struct Node<T> {
    program: Program,
    store: RelationStore,
    transport: T,
    inbox: Inbox,
    tick: u64,
    inspector: Option<Box<dyn Inspector>>,
}

impl<T: Transport> Node<T> {
    pub fn new(program: Program, transport: T, inbox: Inbox) -> Self {
        Self {
            store: program.instantiate(),
            program,
            transport,
            inbox,
            tick: 0,
            inspector: None,
        }
    }

    pub fn with_inspector(mut self, inspector: impl Inspector + 'static) -> Self {
        self.inspector = Some(Box::new(inspector));
        self
    }

    pub fn address(&self) -> &str {
        self.transport.local_addr()
    }

    pub fn tick_count(&self) -> u64 {
        self.tick
    }

    pub fn read(&self, relation: &str) -> Result<&Relation, SchemaError> {
        self.store.read(relation)
    }

    pub(crate) fn inbox_mut(&mut self) -> &mut Inbox {
        &mut self.inbox
    }

    /// Loads tuples straight into a Table, outside any tick.
    pub fn seed<I>(&mut self, table: &str, tuples: I) -> Result<usize, SchemaError>
    where
        I: IntoIterator<Item = Tuple>,
    {
        self.store.merge(table, tuples)?;
        Ok(self.store.commit().merged)
    }

    pub fn tick(&mut self) -> Result<TickReport, ConfigError> {
        self.tick += 1;
        let mut report = TickReport {
            tick: self.tick,
            ..TickReport::default()
        };

        for envelope in self.inbox.drain() {
            self.accept(envelope, &mut report);
        }

        let evaluation = eval::evaluate(&self.program, &mut self.store)?;
        report.derived = evaluation.derived;

        let summary = self.store.commit();
        report.merged = summary.merged;
        report.retracted = summary.retracted;
        report.sent = self.dispatch(evaluation.outbound);

        if let Some(inspector) = self.inspector.as_mut() {
            inspector.after_commit(&report, &self.store);
        }
        self.store.reset_transient();

        debug!(
            tick = report.tick,
            accepted = report.accepted,
            rejected = report.rejected,
            derived = report.derived,
            merged = report.merged,
            retracted = report.retracted,
            sent = report.sent,
            "tick complete"
        );
        Ok(report)
    }

    fn accept(&mut self, envelope: Envelope, report: &mut TickReport) {
        let is_channel = self
            .store
            .read(&envelope.relation)
            .map(|r| r.kind() == RelationKind::Channel);
        match is_channel {
            Ok(true) => {}
            Ok(false) => {
                warn!(relation = %envelope.relation, from = %envelope.from, "inbound tuples for a non-channel relation dropped");
                report.rejected += envelope.tuples.len();
                return;
            }
            Err(err) => {
                warn!(relation = %envelope.relation, from = %envelope.from, error = %err, "inbound tuples dropped");
                report.rejected += envelope.tuples.len();
                return;
            }
        }

        for tuple in envelope.tuples {
            match self.store.insert(&envelope.relation, tuple) {
                Ok(_) => report.accepted += 1,
                Err(err) => {
                    warn!(relation = %envelope.relation, from = %envelope.from, error = %err, "inbound tuple rejected");
                    report.rejected += 1;
                }
            }
        }
    }

    /// Groups outbound tuples by destination and relation, one envelope each.
    fn dispatch(&self, outbound: Vec<Outbound>) -> usize {
        let mut envelopes: BTreeMap<(String, String), Vec<Tuple>> = BTreeMap::new();
        for Outbound { relation, tuple } in outbound {
            let Some(to) = self.destination(&relation, &tuple) else {
                warn!(relation = %relation, %tuple, "outbound tuple has no usable address");
                continue;
            };
            envelopes.entry((to, relation)).or_default().push(tuple);
        }

        let mut sent = 0;
        for ((to, relation), tuples) in envelopes {
            sent += tuples.len();
            self.transport.send(Envelope {
                from: self.transport.local_addr().to_string(),
                to,
                relation,
                tuples,
            });
        }
        sent
    }

    fn destination(&self, relation: &str, tuple: &Tuple) -> Option<String> {
        let index = self.store.read(relation).ok()?.schema().address_index()?;
        match tuple.get(index)? {
            Value::Str(address) => Some(address.clone()),
            _ => None,
        }
    }
}
