use std::collections::HashMap;

use tracing::{info, warn};

use crate::{
    node::TickReport,
    store::{Relation, RelationStore},
};

/// Observes the store once per tick, after commit. Observers never feed
/// anything back into evaluation.
pub trait Inspector: Send {
    fn after_commit(&mut self, report: &TickReport, store: &RelationStore);
}

/// One tuple per line, in key order.
pub fn render(relation: &Relation) -> String {
    relation
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Logs the chosen relations at `info` whenever their contents change.
#[derive(Debug, Default)]
pub struct TracingInspector {
    relations: Vec<String>,
    last: HashMap<String, String>,
}

impl TracingInspector {
    pub fn new<I, S>(relations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            relations: relations.into_iter().map(Into::into).collect(),
            last: HashMap::new(),
        }
    }
}

impl Inspector for TracingInspector {
    fn after_commit(&mut self, report: &TickReport, store: &RelationStore) {
        for name in &self.relations {
            let relation = match store.read(name) {
                Ok(relation) => relation,
                Err(err) => {
                    warn!(relation = %name, error = %err, "cannot inspect");
                    continue;
                }
            };

            let rendered = render(relation);
            if self.last.get(name) == Some(&rendered) {
                continue;
            }
            info!(
                tick = report.tick,
                relation = %name,
                tuples = relation.len(),
                "inspected:\n{rendered}"
            );
            self.last.insert(name.clone(), rendered);
        }
    }
}
