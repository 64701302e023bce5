//! Pending-operation accumulator for the active shard.
//!
//! A batch exists between two flushes: created lazily by the first
//! insert/delete after a flush, applied and discarded by the next one.
//! Applying is atomic from the readers' point of view because the engine
//! publishes the whole commit at once.

use parking_lot::Mutex;
use tantivy::schema::Schema;
use tantivy::{IndexWriter, TantivyDocument, Term};

use kiroku_core::{Error, Result};

use crate::codec::ID_FIELD;

pub(crate) enum BatchOp {
    Upsert { id: String, doc: TantivyDocument },
    Delete { id: String },
}

#[derive(Default)]
pub(crate) struct Batch {
    ops: Vec<BatchOp>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&mut self, id: String, doc: TantivyDocument) {
        self.ops.push(BatchOp::Upsert { id, doc });
    }

    pub fn delete(&mut self, id: String) {
        self.ops.push(BatchOp::Delete { id });
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Apply every pending operation through the shard writer and commit.
    /// Upserts stamp the identity field and replace any document already
    /// carrying the same identifier.
    pub fn apply(self, writer: &Mutex<IndexWriter>, schema: &Schema) -> Result<usize> {
        let id_field = schema
            .get_field(ID_FIELD)
            .map_err(|e| Error::engine("schema has no identity field", e))?;

        let applied = self.ops.len();
        let mut writer = writer.lock();
        for op in self.ops {
            match op {
                BatchOp::Upsert { id, mut doc } => {
                    writer.delete_term(Term::from_field_text(id_field, &id));
                    doc.add_text(id_field, &id);
                    writer
                        .add_document(doc)
                        .map_err(|e| Error::engine("cannot add document to batch", e))?;
                }
                BatchOp::Delete { id } => {
                    writer.delete_term(Term::from_field_text(id_field, &id));
                }
            }
        }
        writer
            .commit()
            .map_err(|e| Error::engine("cannot commit batch", e))?;
        Ok(applied)
    }
}
