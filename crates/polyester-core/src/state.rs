//! The state model: an ordered sequence of [`StateEntry`] values gathered by
//! an operator, compared run-over-run to decide whether the operator needs
//! to re-execute.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A snapshot of a single file's metadata (and, for small files, contents)
/// as observed by an operator's `GetState`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct FileSnapshot {
    /// Path the snapshot was taken of, for diagnostics.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub is_dir: bool,
    #[serde(default)]
    pub mode: u32,
    #[serde(default)]
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mtime: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contents: Option<Vec<u8>>,
}

impl FileSnapshot {
    /// Returns a copy with `mtime` cleared, used by operators (like
    /// `mkdir`) whose directory targets incidentally touch mtime without
    /// meaningful drift.
    pub fn without_timestamps(&self) -> Self {
        Self {
            mtime: None,
            ..self.clone()
        }
    }

    fn changed(&self, other: &FileSnapshot) -> bool {
        self.is_dir != other.is_dir
            || self.mode != other.mode
            || self.sha256 != other.sha256
            || match (self.mtime, other.mtime) {
                (Some(a), Some(b)) => a != b,
                _ => false,
            }
    }
}

/// One recorded fact about an operation's inputs or outputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateEntry {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<FileSnapshot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kv: Option<BTreeMap<String, serde_json::Value>>,
    /// Distinguishes a *source* entry (an input; its change should trigger
    /// re-run) from a *target* entry (an output; its change is the effect).
    #[serde(default)]
    pub target: bool,
}

impl StateEntry {
    pub fn source(name: impl Into<String>, file: FileSnapshot) -> Self {
        Self {
            name: name.into(),
            file: Some(file),
            kv: None,
            target: false,
        }
    }

    pub fn target(name: impl Into<String>, file: FileSnapshot) -> Self {
        Self {
            name: name.into(),
            file: Some(file),
            kv: None,
            target: true,
        }
    }

    pub fn kv(name: impl Into<String>, kv: BTreeMap<String, serde_json::Value>) -> Self {
        Self {
            name: name.into(),
            file: None,
            kv: Some(kv),
            target: false,
        }
    }

    pub fn without_timestamps(&self) -> Self {
        Self {
            file: self.file.as_ref().map(FileSnapshot::without_timestamps),
            ..self.clone()
        }
    }

    /// Returns true if `self` differs from `other` by name, file snapshot,
    /// or KV contents. Both directions of the KV key set are checked (equal
    /// length does not imply equal key set).
    pub fn changed(&self, other: &StateEntry) -> bool {
        if self.name != other.name {
            return true;
        }
        if self.file.is_some() != other.file.is_some() {
            return true;
        }
        if let (Some(a), Some(b)) = (&self.file, &other.file) {
            if a.changed(b) {
                return true;
            }
        }
        if self.kv.is_some() != other.kv.is_some() {
            return true;
        }
        if let (Some(a), Some(b)) = (&self.kv, &other.kv) {
            if a.len() != b.len() {
                return true;
            }
            for (k, v) in a {
                if b.get(k) != Some(v) {
                    return true;
                }
            }
            for k in b.keys() {
                if !a.contains_key(k) {
                    return true;
                }
            }
        }
        false
    }
}

/// An ordered sequence of [`StateEntry`] values gathered by one operator
/// invocation. Equality (`changed`) is positional, not name-sorted: this
/// mirrors the upstream Go implementation, which computes a
/// sort-by-name helper but never calls it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct State {
    pub entries: Vec<StateEntry>,
}

impl State {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns a new `State` with `next` appended; does not mutate `self`,
    /// matching the value-semantics `Append` of the original.
    pub fn append(&self, next: impl IntoIterator<Item = StateEntry>) -> Self {
        let mut entries = self.entries.clone();
        entries.extend(next);
        Self { entries }
    }

    /// Appends an entry built by serialising `val` into a generic KV map
    /// under `name` (the Rust analogue of `AppendKV`, which in the original
    /// decodes an arbitrary struct into `map[string]interface{}` via
    /// `mapstructure`; here `val` must already be `Serialize`).
    pub fn append_kv<T: Serialize>(&self, name: impl Into<String>, val: &T) -> Result<Self, serde_json::Error> {
        let value = serde_json::to_value(val)?;
        let kv = match value {
            serde_json::Value::Object(map) => map.into_iter().collect(),
            other => {
                let mut m = BTreeMap::new();
                m.insert("value".to_string(), other);
                m
            }
        };
        Ok(self.append([StateEntry::kv(name, kv)]))
    }

    /// Entries whose `target` flag is false.
    pub fn source(&self) -> State {
        State {
            entries: self.entries.iter().filter(|e| !e.target).cloned().collect(),
        }
    }

    /// Entries whose `target` flag is true.
    pub fn target(&self) -> State {
        State {
            entries: self.entries.iter().filter(|e| e.target).cloned().collect(),
        }
    }

    /// True iff `self` and `other` differ: different lengths, or any
    /// corresponding pair of entries (by position) differs.
    pub fn changed(&self, other: &State) -> bool {
        if self.entries.len() != other.entries.len() {
            return true;
        }
        self.entries
            .iter()
            .zip(other.entries.iter())
            .any(|(a, b)| a.changed(b))
    }

    pub fn map(&self, f: impl Fn(&StateEntry) -> StateEntry) -> State {
        State {
            entries: self.entries.iter().map(f).collect(),
        }
    }
}

/// A named collection of zero-or-more [`State`] snapshots recorded under a
/// single operation name — used by operators that gather more than one
/// independent state snapshot in one `GetState` call (`apt-install`'s
/// `installed`/`requested` maps, multi-source `copy`/`pcopy`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct States {
    pub states: Vec<StatesEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatesEntry {
    pub op: String,
    pub state: State,
}

impl States {
    pub fn empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn append(&self, op: impl Into<String>, state: State) -> Self {
        let mut states = self.states.clone();
        states.push(StatesEntry { op: op.into(), state });
        Self { states }
    }

    pub fn find(&self, op: &str) -> Vec<&State> {
        self.states
            .iter()
            .filter(|e| e.op == op)
            .map(|e| &e.state)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reflexive_equality() {
        let s = State::new().append([StateEntry::source("a", FileSnapshot::default())]);
        assert!(!s.changed(&s));
    }

    #[test]
    fn empty_states_are_unchanged() {
        assert!(!State::new().changed(&State::new()));
    }

    #[test]
    fn length_mismatch_is_changed() {
        let a = State::new().append([StateEntry::source("a", FileSnapshot::default())]);
        let b = State::new();
        assert!(a.changed(&b));
    }

    #[test]
    fn kv_key_set_mismatch_at_equal_length_is_changed() {
        let mut kv_a = BTreeMap::new();
        kv_a.insert("a".to_string(), serde_json::json!(1));
        let mut kv_b = BTreeMap::new();
        kv_b.insert("b".to_string(), serde_json::json!(1));
        let a = StateEntry::kv("x", kv_a);
        let b = StateEntry::kv("x", kv_b);
        assert!(a.changed(&b));
    }

    #[test]
    fn source_target_split() {
        let s = State::new().append([
            StateEntry::source("in", FileSnapshot::default()),
            StateEntry::target("out", FileSnapshot::default()),
        ]);
        assert_eq!(s.source().entries.len(), 1);
        assert_eq!(s.target().entries.len(), 1);
    }

    #[test]
    fn without_timestamps_ignores_mtime_drift() {
        let mut fs_a = FileSnapshot::default();
        fs_a.mtime = Some(Utc::now());
        let mut fs_b = fs_a.clone();
        fs_b.mtime = Some(Utc::now() + chrono::Duration::seconds(10));
        let a = StateEntry::source("d", fs_a).without_timestamps();
        let b = StateEntry::source("d", fs_b).without_timestamps();
        assert!(!a.changed(&b));
    }

    #[test]
    fn states_find_by_op() {
        let states = States::default()
            .append("installed", State::new())
            .append("requested", State::new());
        assert_eq!(states.find("installed").len(), 1);
        assert_eq!(states.find("missing").len(), 0);
    }
}
