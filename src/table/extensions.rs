//! Table extensions: observers of item lifecycle events.
//!
//! Extensions run under the table lock, so a callback must never call back
//! into its own table's blocking operations (that would deadlock on the
//! table mutex). Operations on *other* tables are fine, which is exactly
//! what [`InsertOnSampleExtension`] does. Extensions are advisory: a failing
//! callback is logged and the host operation commits regardless.

use std::sync::Arc;
use std::time::Duration;

use crate::core::item::TableItem;
use crate::table::PriorityTable;

/// Observer of a table's item lifecycle, invoked under the table lock.
///
/// All callbacks default to no-ops so implementations only override what
/// they care about.
pub trait TableExtension: Send {
    /// A new item was committed to the table.
    fn on_insert(&mut self, _item: &TableItem) {}

    /// An item was returned by `sample`; `times_sampled` is the count after
    /// this sampling.
    fn on_sample(&mut self, _item: &TableItem, _times_sampled: i32) {}

    /// An existing item's priority was overwritten.
    fn on_update(&mut self, _item: &TableItem) {}

    /// An item was removed (explicit delete, eviction or auto-delete).
    fn on_delete(&mut self, _item: &TableItem) {}

    /// The table was reset.
    fn on_reset(&mut self) {}

    /// A checkpoint finished loading; `tables` holds every restored table so
    /// extensions can re-resolve cross-table references by name.
    fn on_checkpoint_loaded(&mut self, _tables: &[Arc<PriorityTable>]) {}

    /// The extension was registered with the named table.
    fn after_register(&mut self, _table_name: &str) {}

    /// The extension is about to be removed from the named table.
    fn before_unregister(&mut self, _table_name: &str) {}
}

/// Copies each item into a target table the first time it is sampled.
///
/// The copy keeps the source key (so priority updates can be addressed to
/// the target straight away) and the sampling count, but takes the target's
/// table name and a fresh `inserted_at`. Insert failures on the target are
/// logged and swallowed; the originating sample commits either way.
pub struct InsertOnSampleExtension {
    target: Arc<PriorityTable>,
    timeout: Option<Duration>,
    source_name: Option<String>,
}

impl InsertOnSampleExtension {
    /// Create an extension that copies first-time samples into `target`.
    ///
    /// `timeout` bounds how long the copy may block on the target's insert
    /// gate; `None` waits forever. The target must be a different table than
    /// the one the extension is registered with.
    pub fn new(target: Arc<PriorityTable>, timeout: Option<Duration>) -> Self {
        Self {
            target,
            timeout,
            source_name: None,
        }
    }

    /// Name of the target table.
    pub fn target_name(&self) -> &str {
        self.target.name()
    }
}

impl TableExtension for InsertOnSampleExtension {
    fn on_sample(&mut self, item: &TableItem, times_sampled: i32) {
        if times_sampled != 1 {
            return;
        }

        let mut copy = item.clone();
        copy.metadata.table = self.target.name().to_string();
        copy.metadata.inserted_at = None;

        if let Err(err) = self.target.insert_or_assign(copy, self.timeout) {
            log::warn!(
                "failed to copy item {} from table '{}' to table '{}': {}",
                item.metadata.key,
                self.source_name.as_deref().unwrap_or("<unregistered>"),
                self.target.name(),
                err
            );
        }
    }

    fn on_checkpoint_loaded(&mut self, tables: &[Arc<PriorityTable>]) {
        let target_name = self.target.name().to_string();
        match tables.iter().find(|table| table.name() == target_name) {
            Some(table) => self.target = Arc::clone(table),
            None => panic!(
                "target table '{}' not found in list of loaded tables",
                target_name
            ),
        }
    }

    fn after_register(&mut self, table_name: &str) {
        self.source_name = Some(table_name.to_string());
    }

    fn before_unregister(&mut self, _table_name: &str) {
        self.source_name = None;
    }
}
