use crate::cell::Cell;
use crate::tag::TagCompound;
use log::debug;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::iter::FromIterator;

/// Canonical value written for names with no translation.
pub const DEFAULT_FALLBACK_CONTENTS: u32 = 4;

/// Immutable mapping from foreign block names to canonical cells.
///
/// Built once and shared read-only between import workers.
pub struct BlockTranslator {
    cells: HashMap<String, Cell>,
    fallback: Cell,
}

impl BlockTranslator {
    pub fn new<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = (S, Cell)>,
        S: Into<String>,
    {
        let cells = entries
            .into_iter()
            .map(|(name, cell)| (name.into(), cell))
            .collect();

        BlockTranslator {
            cells,
            fallback: Cell::from_contents(DEFAULT_FALLBACK_CONTENTS),
        }
    }

    pub fn with_fallback(mut self, fallback: Cell) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn fallback(&self) -> Cell {
        self.fallback
    }

    pub fn lookup(&self, name: &str) -> Option<Cell> {
        self.cells.get(name).copied()
    }

    /// Translates a foreign block, applying its orientation properties.
    ///
    /// Unknown names are recorded in `misses` and yield the fallback cell.
    pub fn translate<T: TagCompound>(
        &self,
        name: &str,
        properties: Option<&T>,
        misses: &TranslationMisses,
    ) -> Cell {
        let cell = match self.lookup(name) {
            Some(cell) => cell,
            None => {
                misses.record(name);
                return self.fallback;
            }
        };

        let facing = properties.and_then(|p| p.text("facing"));

        match name {
            "minecraft:wall_torch" => {
                let data = match facing {
                    Some("south") => 0,
                    Some("east") => 1,
                    Some("north") => 2,
                    Some("west") => 3,
                    _ => 4,
                };
                cell.with_data(data)
            }
            "minecraft:torch" => cell.with_data(4),
            _ if name.ends_with("_stairs") => {
                let upside_down = properties
                    .and_then(|p| p.text("half"))
                    .map_or(false, |half| half == "top");

                let rotation = match facing {
                    Some("north") => 0,
                    Some("west") => 1,
                    Some("south") => 2,
                    Some("east") => 3,
                    _ => return cell,
                };

                cell.with_stair_rotation(rotation)
                    .with_upside_down(upside_down)
            }
            _ => cell,
        }
    }
}

impl<S: Into<String>> FromIterator<(S, Cell)> for BlockTranslator {
    fn from_iter<I: IntoIterator<Item = (S, Cell)>>(iter: I) -> Self {
        BlockTranslator::new(iter)
    }
}

/// Deduplicated set of foreign names that had no translation.
#[derive(Default)]
pub struct TranslationMisses {
    names: Mutex<BTreeSet<String>>,
}

impl TranslationMisses {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn record(&self, name: &str) {
        let mut names = self.names.lock();

        if !names.contains(name) {
            debug!(target: "terrain-store", "No translation for block {}", name);
            names.insert(name.to_owned());
        }
    }

    pub fn len(&self) -> usize {
        self.names.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.lock().is_empty()
    }

    /// Recorded names in sorted order.
    pub fn names(&self) -> Vec<String> {
        self.names.lock().iter().cloned().collect()
    }
}
