//! Pure filename classification (spec.md §4.1).
//!
//! Recognises three disjoint classes by suffix/numeric-id pattern: data
//! files (`<n>.sst`), log files (`<n>.log`), and everything else (manifest,
//! IDENTITY, CURRENT, LOCK, directories).

/// The three dispatch classes the virtual environment routes on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileClass {
    Data,
    Log,
    Other,
}

const DATA_EXTENSION: &str = "sst";
const LOG_EXTENSION: &str = "log";

/// Classify a path (which may carry directory components) by its filename.
pub fn classify(path: &str) -> FileClass {
    let name = path.rsplit('/').next().unwrap_or(path);
    let name = strip_epoch(name);

    let Some((stem, ext)) = name.rsplit_once('.') else {
        return FileClass::Other;
    };

    if !is_numeric_id(stem) {
        return FileClass::Other;
    }

    match ext {
        DATA_EXTENSION => FileClass::Data,
        LOG_EXTENSION => FileClass::Log,
        _ => FileClass::Other,
    }
}

fn is_numeric_id(stem: &str) -> bool {
    !stem.is_empty() && stem.bytes().all(|b| b.is_ascii_digit())
}

/// Remove a leading `<epoch>.` prefix used by cloud-manifest remapping,
/// e.g. `1699999999123456789-ab12.42.sst` -> `42.sst`. A name with no
/// recognisable epoch prefix is returned unchanged.
pub fn strip_epoch(name: &str) -> &str {
    // An epoch prefix is itself numeric-or-hyphen-or-dash content followed
    // by a `.`; the remainder after stripping it must still look like
    // `<numeric-id>.<ext>` for the strip to be considered valid. We find
    // the *last* two dot-separated components and check those; anything
    // before them is treated as an epoch prefix to discard.
    let parts: Vec<&str> = name.rsplit('.').take(3).collect();
    if parts.len() == 3 {
        let (ext, stem, epoch_plus) = (parts[0], parts[1], parts[2]);
        let _ = epoch_plus;
        if is_numeric_id(stem) && (ext == DATA_EXTENSION || ext == LOG_EXTENSION) {
            return &name[name.len() - stem.len() - 1 - ext.len()..];
        }
    }
    name
}
