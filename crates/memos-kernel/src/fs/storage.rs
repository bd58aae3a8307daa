//! Plain storage filesystem: a bare inode table.

use memos_types::DevId;

use super::{FileSystem, InodeTable};

#[derive(Debug)]
pub struct StorageFs {
    fstype: String,
    source: String,
    table: InodeTable,
}

impl StorageFs {
    pub fn new(dev: DevId, fstype: &str, source: &str, root_perm: u32) -> Self {
        Self {
            fstype: fstype.to_string(),
            source: source.to_string(),
            table: InodeTable::new(dev, root_perm, 0, 0),
        }
    }
}

impl FileSystem for StorageFs {
    fn fstype(&self) -> &str {
        &self.fstype
    }

    fn source(&self) -> &str {
        &self.source
    }

    fn table(&self) -> &InodeTable {
        &self.table
    }

    fn table_mut(&mut self) -> &mut InodeTable {
        &mut self.table
    }
}
