use parking_lot::Mutex;
use stockpile_model::FileRecord;

/// Pending metadata-store operations produced on the request path and
/// drained by the sync loop. Single producer per class, single consumer.
#[derive(Debug, Default)]
pub struct PendingQueues {
    add: Mutex<Vec<FileRecord>>,
    update: Mutex<Vec<FileRecord>>,
    delete: Mutex<Vec<String>>,
}

/// Everything queued at drain time.
#[derive(Debug, Default)]
pub struct DrainedOps {
    pub add: Vec<FileRecord>,
    pub update: Vec<FileRecord>,
    pub delete: Vec<String>,
}

impl DrainedOps {
    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.update.is_empty() && self.delete.is_empty()
    }
}

impl PendingQueues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue_add(&self, record: FileRecord) {
        self.add.lock().push(record);
    }

    pub fn queue_update(&self, record: FileRecord) {
        self.update.lock().push(record);
    }

    pub fn queue_delete(&self, path: impl Into<String>) {
        self.delete.lock().push(path.into());
    }

    pub fn drain(&self) -> DrainedOps {
        DrainedOps {
            add: std::mem::take(&mut *self.add.lock()),
            update: std::mem::take(&mut *self.update.lock()),
            delete: std::mem::take(&mut *self.delete.lock()),
        }
    }

    /// `(add, update, delete)` backlog sizes.
    pub fn depths(&self) -> (usize, usize, usize) {
        (self.add.lock().len(), self.update.lock().len(), self.delete.lock().len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_empties_all_queues() {
        let queues = PendingQueues::new();
        queues.queue_add(FileRecord::new("a", "a.bin", 1));
        queues.queue_update(FileRecord::new("b", "b.bin", 2));
        queues.queue_delete("c.bin");
        assert_eq!(queues.depths(), (1, 1, 1));

        let drained = queues.drain();
        assert_eq!(drained.add.len(), 1);
        assert_eq!(drained.update.len(), 1);
        assert_eq!(drained.delete, vec!["c.bin"]);
        assert_eq!(queues.depths(), (0, 0, 0));
        assert!(queues.drain().is_empty());
    }
}
