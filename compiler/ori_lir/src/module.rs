//! The module arena.
//!
//! Globals live in slots addressed by [`GlobalId`]. Erasing a global empties
//! its slot so every other id stays valid. Names are unique among named
//! globals: adding or renaming onto a taken name picks `name.1`, `name.2`,
//! and so on.

use std::collections::BTreeMap;
use std::ops::{Index, IndexMut};

use rustc_hash::{FxHashMap, FxHashSet};

use crate::global::{GlobalId, GlobalValue};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Module {
    pub name: String,
    pub target_triple: String,
    pub data_layout: String,
    /// Source file name recorded in debug info and object metadata.
    pub source_file: String,
    flags: BTreeMap<String, String>,
    globals: Vec<Option<GlobalValue>>,
    names: FxHashMap<String, GlobalId>,
}

impl Module {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            source_file: name.clone(),
            name,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_target(mut self, triple: impl Into<String>, data_layout: impl Into<String>) -> Self {
        self.target_triple = triple.into();
        self.data_layout = data_layout.into();
        self
    }

    // ── Flags ───────────────────────────────────────────────────────

    pub fn flag(&self, key: &str) -> Option<&str> {
        self.flags.get(key).map(String::as_str)
    }

    pub fn set_flag(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.flags.insert(key.into(), value.into());
    }

    pub fn flags(&self) -> impl Iterator<Item = (&str, &str)> {
        self.flags.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    // ── Slots ───────────────────────────────────────────────────────

    /// Add a global, renaming it if its name is already taken.
    pub fn add(&mut self, mut global: GlobalValue) -> GlobalId {
        let id = GlobalId::new(
            u32::try_from(self.globals.len()).unwrap_or_else(|_| panic!("module has too many globals")),
        );
        if !global.name.is_empty() {
            global.name = self.unique_name(&global.name);
            self.names.insert(global.name.clone(), id);
        }
        self.globals.push(Some(global));
        id
    }

    /// `base` if unused, else the first free `base.<n>`.
    pub fn unique_name(&self, base: &str) -> String {
        if !self.names.contains_key(base) {
            return base.to_owned();
        }
        (1u32..)
            .map(|n| format!("{base}.{n}"))
            .find(|candidate| !self.names.contains_key(candidate))
            .unwrap_or_else(|| base.to_owned())
    }

    pub fn get(&self, id: GlobalId) -> Option<&GlobalValue> {
        self.globals.get(id.index()).and_then(Option::as_ref)
    }

    /// Mutable access. Rename through [`Module::set_name`], never by
    /// writing `name` directly.
    pub fn get_mut(&mut self, id: GlobalId) -> Option<&mut GlobalValue> {
        self.globals.get_mut(id.index()).and_then(Option::as_mut)
    }

    pub fn contains(&self, id: GlobalId) -> bool {
        self.get(id).is_some()
    }

    pub fn lookup(&self, name: &str) -> Option<GlobalId> {
        self.names.get(name).copied()
    }

    /// Number of live globals.
    pub fn len(&self) -> usize {
        self.globals.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of slots ever allocated, including erased ones.
    pub fn slot_count(&self) -> usize {
        self.globals.len()
    }

    /// Live globals in id order.
    pub fn iter(&self) -> impl Iterator<Item = (GlobalId, &GlobalValue)> {
        self.globals.iter().enumerate().filter_map(|(i, slot)| {
            slot.as_ref().map(|global| (Self::id_at(i), global))
        })
    }

    /// Ids of live globals in id order.
    pub fn ids(&self) -> Vec<GlobalId> {
        self.iter().map(|(id, _)| id).collect()
    }

    // `add` refuses to grow past u32::MAX slots.
    #[expect(clippy::cast_possible_truncation, reason = "slot count bounded by add()")]
    fn id_at(index: usize) -> GlobalId {
        GlobalId::new(index as u32)
    }

    // ── Names ───────────────────────────────────────────────────────

    /// Rename a global. An empty name makes it anonymous; a taken name is
    /// made unique. Returns the name actually assigned.
    pub fn set_name(&mut self, id: GlobalId, name: &str) -> Option<&str> {
        let old = self.get(id)?.name.clone();
        if old == name {
            return self.get(id).map(|g| g.name.as_str());
        }
        if !old.is_empty() {
            self.names.remove(&old);
        }
        let assigned = if name.is_empty() {
            String::new()
        } else {
            let unique = self.unique_name(name);
            self.names.insert(unique.clone(), id);
            unique
        };
        let global = self.get_mut(id)?;
        global.name = assigned;
        Some(global.name.as_str())
    }

    /// Move `src`'s name onto `dst`. `src` becomes anonymous.
    pub fn take_name(&mut self, dst: GlobalId, src: GlobalId) {
        let Some(name) = self.get(src).map(|g| g.name.clone()) else {
            return;
        };
        self.set_name(src, "");
        self.set_name(dst, &name);
    }

    // ── Erase / uses ────────────────────────────────────────────────

    /// Remove a global, leaving its slot empty. Remaining references to it
    /// become dangling; callers replace uses first.
    pub fn erase(&mut self, id: GlobalId) -> Option<GlobalValue> {
        let global = self.globals.get_mut(id.index())?.take()?;
        if !global.name.is_empty() {
            self.names.remove(&global.name);
        }
        Some(global)
    }

    /// Rewrite every reference to `from` into `to` across the module.
    pub fn replace_all_uses_with(&mut self, from: GlobalId, to: GlobalId) -> usize {
        self.globals
            .iter_mut()
            .flatten()
            .map(|global| global.replace_references(from, to))
            .sum()
    }

    /// Distinct globals referenced by `id`, in first-occurrence order.
    pub fn references(&self, id: GlobalId) -> Vec<GlobalId> {
        let mut seen = FxHashSet::default();
        let mut refs = Vec::new();
        if let Some(global) = self.get(id) {
            global.for_each_reference(&mut |target| {
                if seen.insert(target) {
                    refs.push(target);
                }
            });
        }
        refs
    }

    /// Live globals that reference `id`.
    pub fn users_of(&self, id: GlobalId) -> Vec<GlobalId> {
        self.iter()
            .filter(|(_, global)| {
                let mut found = false;
                global.for_each_reference(&mut |target| found |= target == id);
                found
            })
            .map(|(user, _)| user)
            .collect()
    }

    /// Consume the module, yielding live globals with their ids and the
    /// module flags.
    pub fn into_parts(self) -> (Vec<(GlobalId, GlobalValue)>, BTreeMap<String, String>) {
        let globals = self
            .globals
            .into_iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.map(|global| (Self::id_at(i), global)))
            .collect();
        (globals, self.flags)
    }

    /// Replace the contents of a live slot, keeping its current name.
    pub fn replace(&mut self, id: GlobalId, mut global: GlobalValue) -> Option<GlobalValue> {
        let slot = self.globals.get_mut(id.index())?.as_mut()?;
        global.name = std::mem::take(&mut slot.name);
        Some(std::mem::replace(slot, global))
    }

    pub fn defined_function_count(&self) -> usize {
        self.iter()
            .filter(|(_, g)| g.is_function() && !g.is_declaration())
            .count()
    }
}

impl Index<GlobalId> for Module {
    type Output = GlobalValue;

    fn index(&self, id: GlobalId) -> &GlobalValue {
        match self.get(id) {
            Some(global) => global,
            None => panic!("global {id:?} is not live in module `{}`", self.name),
        }
    }
}

impl IndexMut<GlobalId> for Module {
    fn index_mut(&mut self, id: GlobalId) -> &mut GlobalValue {
        assert!(
            self.contains(id),
            "global {id:?} is not live in module `{}`",
            self.name
        );
        self.globals[id.index()]
            .as_mut()
            .unwrap_or_else(|| unreachable!())
    }
}
