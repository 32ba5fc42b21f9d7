//! Classification of HTTP entry points into write, replayable, and
//! auto-shard sets.
//!
//! The dispatcher asks these questions for every incoming `(controller,
//! action)` pair: does the request mutate state (and therefore need a log
//! record), should it be re-applied during recovery, and may it be
//! redistributed across shards instead of pinned by collection key. The
//! replay set is a subset of the write set -- some writes are idempotent
//! effects of other writes and must be suppressed on replay.
//!
//! A classifier is an explicit value; build one, then either pass it around
//! or [`install`](WriteReqClassifier::install) it once at process start for
//! code that wants the process-wide tables.

use std::collections::HashSet;
use std::sync::OnceLock;

/// Error type for classifier installation.
#[derive(Debug, thiserror::Error)]
pub enum ClassifierError {
    /// The process-wide classifier has already been installed.
    #[error("write-request classifier already installed")]
    AlreadyInstalled,
}

static INSTALLED: OnceLock<WriteReqClassifier> = OnceLock::new();

fn key(controller: &str, action: &str) -> String {
    format!("{controller}_{action}")
}

/// Builder for a [`WriteReqClassifier`].
///
/// `replay_write` and `auto_shard_write` entries are also write entries; the
/// builder inserts them into the write set so the subsets stay consistent.
#[derive(Debug, Default)]
pub struct ClassifierBuilder {
    write_req: HashSet<String>,
    replay_write_req: HashSet<String>,
    auto_shard_write: HashSet<String>,
}

impl ClassifierBuilder {
    /// An empty builder.
    pub fn new() -> ClassifierBuilder {
        ClassifierBuilder::default()
    }

    /// Register a state-mutating entry point that is not replayed.
    pub fn write(mut self, controller: &str, action: &str) -> ClassifierBuilder {
        self.write_req.insert(key(controller, action));
        self
    }

    /// Register a write that is re-applied during recovery.
    pub fn replay_write(mut self, controller: &str, action: &str) -> ClassifierBuilder {
        let k = key(controller, action);
        self.write_req.insert(k.clone());
        self.replay_write_req.insert(k);
        self
    }

    /// Register a write the dispatcher may redistribute across shards.
    pub fn auto_shard_write(mut self, controller: &str, action: &str) -> ClassifierBuilder {
        let k = key(controller, action);
        self.write_req.insert(k.clone());
        self.auto_shard_write.insert(k);
        self
    }

    /// Finish building.
    pub fn build(self) -> WriteReqClassifier {
        WriteReqClassifier {
            write_req: self.write_req,
            replay_write_req: self.replay_write_req,
            auto_shard_write: self.auto_shard_write,
        }
    }
}

/// Read-only routing tables over `"{controller}_{action}"` keys.
#[derive(Debug)]
pub struct WriteReqClassifier {
    write_req: HashSet<String>,
    replay_write_req: HashSet<String>,
    auto_shard_write: HashSet<String>,
}

impl WriteReqClassifier {
    /// The platform's stock routing tables: document mutation, index and
    /// rebuild commands, collection lifecycle, configuration push, and the
    /// recommender write surface.
    pub fn default_tables() -> WriteReqClassifier {
        ClassifierBuilder::new()
            .auto_shard_write("documents", "create")
            .auto_shard_write("documents", "update")
            .auto_shard_write("documents", "destroy")
            .replay_write("documents", "update_inplace")
            .write("documents", "visit")
            .replay_write("commands", "index")
            .replay_write("commands", "index_recommend")
            .write("commands", "optimize_index")
            .write("commands", "mining")
            .replay_write("collection", "update_collection_conf")
            .replay_write("collection", "rebuild_from_scd")
            .write("collection", "rebuild_collection")
            .write("collection", "start_collection")
            .write("collection", "stop_collection")
            .replay_write("recommend", "add_user")
            .replay_write("recommend", "update_user")
            .replay_write("recommend", "remove_user")
            .auto_shard_write("recommend", "visit_item")
            .auto_shard_write("recommend", "purchase_item")
            .replay_write("recommend", "track_event")
            .replay_write("recommend", "rate_item")
            .write("faceted", "click_group_label")
            .replay_write("faceted", "set_custom_rank")
            .build()
    }

    /// Whether the pair mutates state and must be logged.
    pub fn is_write(&self, controller: &str, action: &str) -> bool {
        self.write_req.contains(&key(controller, action))
    }

    /// Whether the pair is re-applied during recovery.
    pub fn is_replay_write(&self, controller: &str, action: &str) -> bool {
        self.replay_write_req.contains(&key(controller, action))
    }

    /// Whether the dispatcher may redistribute the pair across shards.
    pub fn is_auto_shard_write(&self, controller: &str, action: &str) -> bool {
        self.auto_shard_write.contains(&key(controller, action))
    }

    /// Install this classifier as the process-wide instance.
    ///
    /// One-shot: a second call returns [`ClassifierError::AlreadyInstalled`]
    /// and leaves the first installation in place.
    pub fn install(self) -> Result<(), ClassifierError> {
        INSTALLED
            .set(self)
            .map_err(|_| ClassifierError::AlreadyInstalled)
    }

    /// The installed process-wide classifier, if any.
    pub fn global() -> Option<&'static WriteReqClassifier> {
        INSTALLED.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_tables_classify_document_mutation_as_write() {
        let classifier = WriteReqClassifier::default_tables();
        assert!(classifier.is_write("documents", "create"));
        assert!(classifier.is_write("commands", "index"));
        assert!(!classifier.is_write("documents", "search"));
        assert!(!classifier.is_write("documents", "get"));
    }

    #[test]
    fn replay_set_is_a_subset_of_the_write_set() {
        let classifier = WriteReqClassifier::default_tables();
        assert!(classifier.is_replay_write("commands", "index"));
        assert!(classifier.is_write("commands", "index"));

        // A write suppressed on replay.
        assert!(classifier.is_write("commands", "optimize_index"));
        assert!(!classifier.is_replay_write("commands", "optimize_index"));
    }

    #[test]
    fn auto_shard_writes_are_writes() {
        let classifier = WriteReqClassifier::default_tables();
        assert!(classifier.is_auto_shard_write("documents", "create"));
        assert!(classifier.is_write("documents", "create"));

        // Pinned writes are not auto-shard.
        assert!(!classifier.is_auto_shard_write("collection", "rebuild_from_scd"));
    }

    #[test]
    fn builder_composes_custom_entries() {
        let classifier = ClassifierBuilder::new()
            .write("custom", "flush")
            .replay_write("custom", "ingest")
            .auto_shard_write("custom", "upsert")
            .build();

        assert!(classifier.is_write("custom", "flush"));
        assert!(classifier.is_write("custom", "ingest"));
        assert!(classifier.is_replay_write("custom", "ingest"));
        assert!(!classifier.is_replay_write("custom", "flush"));
        assert!(classifier.is_auto_shard_write("custom", "upsert"));
    }

    #[test]
    fn install_is_one_shot() {
        // First install in this process wins; the second reports
        // AlreadyInstalled and the tables stay queryable.
        let first = WriteReqClassifier::default_tables().install();
        let second = WriteReqClassifier::default_tables().install();
        assert!(first.is_ok() || matches!(first, Err(ClassifierError::AlreadyInstalled)));
        assert!(matches!(second, Err(ClassifierError::AlreadyInstalled)));

        let global = WriteReqClassifier::global().expect("classifier should be installed");
        assert!(global.is_write("documents", "create"));
    }
}
