//! The `.debug_line` directory and file tables.
//!
//! Both tables are 1-based; index 0 means "no entry" for directories and is
//! a reserved slot for files. File slots can be pre-assigned by `.file N`
//! directives, so the file table may be sparse until emission fills the
//! holes.

use indexmap::IndexSet;

use dwarfline_common::split_file_path;

/// A file table entry: base name plus a directory table index.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct FileEntry {
    pub name: String,
    pub dir: u32,
}

#[derive(Debug)]
struct LastUsed {
    file: u32,
    dir_len: usize,
}

/// The interned directory and file tables.
#[derive(Debug)]
pub(crate) struct FileTables {
    /// Slot 0 is reserved and never emitted.
    files: Vec<Option<FileEntry>>,
    /// Directory N is `dirs[N - 1]`.
    dirs: IndexSet<String>,
    /// One-element cache short-circuiting repeat lookups of the same path.
    last_used: Option<LastUsed>,
}

impl FileTables {
    pub fn new() -> Self {
        Self {
            files: vec![None],
            dirs: IndexSet::new(),
            last_used: None,
        }
    }

    /// The directory string for a directory index; index 0 is empty.
    pub fn dir_name(&self, dir: u32) -> &str {
        match dir {
            0 => "",
            n => self.dirs.get_index(n as usize - 1).map(String::as_str).unwrap_or(""),
        }
    }

    /// Directory entries in table order, starting at index 1.
    pub fn dirs(&self) -> impl Iterator<Item = &str> {
        self.dirs.iter().map(String::as_str)
    }

    /// One past the highest assigned file slot.
    pub fn num_files(&self) -> u32 {
        self.files.len() as u32
    }

    /// The entry at a file slot, if assigned.
    pub fn entry(&self, num: u32) -> Option<&FileEntry> {
        self.files.get(num as usize)?.as_ref()
    }

    /// Whether any file has been interned.
    pub fn seen_any(&self) -> bool {
        self.files.iter().any(Option::is_some)
    }

    /// Interns `path`, returning its file number.
    ///
    /// With `num == 0` an existing entry with the same directory and base
    /// name is reused, else the next slot past the current table end is
    /// taken. A nonzero `num` assigns exactly that slot, zero-filling any
    /// gap; the caller is responsible for rejecting occupied slots first.
    pub fn intern(&mut self, path: &str, num: u32) -> u32 {
        if num == 0 {
            if let Some(hit) = self.lookup_cached(path) {
                return hit;
            }
        }

        let (dir_name, base) = split_file_path(path);
        let dir_len = dir_name.map_or(0, str::len);
        let dir = match dir_name {
            None => 0,
            Some(name) => self.dirs.insert_full(name.into()).0 as u32 + 1,
        };

        let slot = if num == 0 {
            match self.find_existing(dir, base) {
                Some(found) => {
                    self.last_used = Some(LastUsed {
                        file: found,
                        dir_len,
                    });
                    return found;
                }
                None => self.files.len() as u32,
            }
        } else {
            num
        };

        if slot as usize >= self.files.len() {
            // Grow in blocks of 32 so sparse .file numbering stays cheap.
            self.files.reserve(slot as usize + 32 - self.files.len());
            self.files.resize(slot as usize + 1, None);
        }
        self.files[slot as usize] = Some(FileEntry {
            name: base.into(),
            dir,
        });
        self.last_used = Some(LastUsed {
            file: slot,
            dir_len,
        });
        slot
    }

    fn lookup_cached(&self, path: &str) -> Option<u32> {
        let last = self.last_used.as_ref()?;
        let entry = self.entry(last.file)?;
        if entry.dir == 0 {
            return (path == entry.name).then_some(last.file);
        }

        let dir = self.dir_name(entry.dir);
        let matches = dir.len() == last.dir_len
            && path.len() > last.dir_len
            && path.is_char_boundary(last.dir_len)
            && path[..last.dir_len] == *dir
            && matches!(path.as_bytes()[last.dir_len], b'/' | b'\\')
            && path[last.dir_len + 1..] == entry.name;
        matches.then_some(last.file)
    }

    fn find_existing(&self, dir: u32, base: &str) -> Option<u32> {
        (1..self.files.len() as u32).find(|&i| {
            self.files[i as usize]
                .as_ref()
                .is_some_and(|entry| entry.dir == dir && entry.name == base)
        })
    }

    /// Fills unassigned slots below the table end with empty names so that
    /// emission cannot crash on them. Returns the slots that were filled.
    pub fn fill_missing(&mut self) -> Vec<u32> {
        let mut filled = Vec::new();
        for (i, slot) in self.files.iter_mut().enumerate().skip(1) {
            if slot.is_none() {
                *slot = Some(FileEntry {
                    name: String::new(),
                    dir: 0,
                });
                filled.push(i as u32);
            }
        }
        filled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reuse_same_path() {
        let mut tables = FileTables::new();
        let a = tables.intern("a/b/c.c", 0);
        let b = tables.intern("a/b/c.c", 0);
        assert_eq!(a, b);
        assert_eq!(a, 1);
    }

    #[test]
    fn test_same_dir_new_file() {
        let mut tables = FileTables::new();
        let a = tables.intern("a/b/c.c", 0);
        let b = tables.intern("a/b/d.c", 0);
        assert_ne!(a, b);
        assert_eq!(tables.entry(a).unwrap().dir, tables.entry(b).unwrap().dir);
        assert_eq!(tables.dirs().count(), 1);
    }

    #[test]
    fn test_lru_does_not_cross_directories() {
        let mut tables = FileTables::new();
        let a = tables.intern("a/c.c", 0);
        let b = tables.intern("b/c.c", 0);
        assert_ne!(a, b);
        // Bare name must not hit the cached directory-qualified entry.
        let c = tables.intern("c.c", 0);
        assert_ne!(b, c);
        assert_eq!(tables.entry(c).unwrap().dir, 0);
    }

    #[test]
    fn test_sparse_slots() {
        let mut tables = FileTables::new();
        tables.intern("x", 5);
        tables.intern("y", 2);
        assert_eq!(tables.num_files(), 6);
        assert!(tables.entry(1).is_none());
        assert!(tables.entry(3).is_none());
        assert!(tables.entry(4).is_none());
        assert_eq!(tables.entry(5).unwrap().name, "x");

        let filled = tables.fill_missing();
        assert_eq!(filled, [1, 3, 4]);
        assert_eq!(tables.entry(1).unwrap().name, "");
    }

    #[test]
    fn test_auto_slot_appends_after_sparse() {
        let mut tables = FileTables::new();
        tables.intern("x", 3);
        // Automatic numbering continues past the highest assigned slot.
        assert_eq!(tables.intern("y", 0), 4);
    }
}
