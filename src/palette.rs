//! Block and item identifier tables.
//!
//! Every backend numbers blocks and items its own way. A [`Palette`]
//! maps those numbers to stable string identifiers, and a
//! [`PaletteRewrite`] translates numbers between the palette the
//! client knows (upstream) and the one the current backend uses
//! (downstream).

use ahash::AHashMap;
use serde::Deserialize;
use std::{
    fmt,
    hash::Hash,
    marker::PhantomData,
    sync::{Arc, Mutex, PoisonError},
};

/// What kind of identifiers a palette holds.
pub trait PaletteKind: Send + Sync + 'static {
    type Id: Copy + Eq + Ord + Hash + fmt::Debug + fmt::Display + Send + Sync + 'static;

    const NAME: &'static str;

    /// Digest input for an id.
    fn id_bytes(id: Self::Id) -> [u8; 8];

    /// Id substituted when `id` has no counterpart in `target`.
    fn missing(target: &Palette<Self>, id: Self::Id) -> Self::Id
    where
        Self: Sized;
}

/// Block runtime ids.
pub enum Blocks {}

impl Blocks {
    /// Placeholder block shown for states the client does not know.
    pub const UNKNOWN_BLOCK: &'static str = "minecraft:info_update";
}

impl PaletteKind for Blocks {
    type Id = u32;

    const NAME: &'static str = "block";

    fn id_bytes(id: u32) -> [u8; 8] {
        u64::from(id).to_le_bytes()
    }

    fn missing(target: &Palette<Self>, id: u32) -> u32 {
        target.id_of(Self::UNKNOWN_BLOCK).unwrap_or(id)
    }
}

/// Item network ids.
pub enum Items {}

impl Items {
    pub const AIR: i32 = 0;
}

impl PaletteKind for Items {
    type Id = i32;

    const NAME: &'static str = "item";

    fn id_bytes(id: i32) -> [u8; 8] {
        i64::from(id).to_le_bytes()
    }

    fn missing(_target: &Palette<Self>, _id: i32) -> i32 {
        Self::AIR
    }
}

pub type BlockPalette = Palette<Blocks>;
pub type ItemPalette = Palette<Items>;

/// An immutable identifier table, identified by a digest of its contents.
pub struct Palette<K: PaletteKind> {
    digest: [u8; 32],
    by_id: AHashMap<K::Id, Arc<str>>,
    by_name: AHashMap<Arc<str>, K::Id>,
    _kind: PhantomData<K>,
}

impl<K: PaletteKind> Palette<K> {
    pub fn new(entries: impl IntoIterator<Item = (String, K::Id)>) -> Self {
        let mut entries: Vec<(String, K::Id)> = entries.into_iter().collect();
        entries.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));

        let mut hasher = blake3::Hasher::new();
        hasher.update(K::NAME.as_bytes());
        let mut by_id = AHashMap::with_capacity(entries.len());
        let mut by_name = AHashMap::with_capacity(entries.len());
        for (name, id) in entries {
            hasher.update(&K::id_bytes(id));
            hasher.update(name.as_bytes());
            hasher.update(&[0]);

            let name: Arc<str> = name.into();
            by_name.entry(name.clone()).or_insert(id);
            by_id.entry(id).or_insert(name);
        }

        Self {
            digest: *hasher.finalize().as_bytes(),
            by_id,
            by_name,
            _kind: PhantomData,
        }
    }

    pub fn empty() -> Self {
        Self::new(std::iter::empty())
    }

    /// Parses a JSON array of `{"name": .., "id": ..}` entries.
    pub fn from_json(json: &[u8]) -> serde_json::Result<Self>
    where
        K::Id: for<'de> Deserialize<'de>,
    {
        #[derive(Deserialize)]
        struct Entry<Id> {
            name: String,
            id: Id,
        }

        let entries: Vec<Entry<K::Id>> = serde_json::from_slice(json)?;
        Ok(Self::new(
            entries.into_iter().map(|entry| (entry.name, entry.id)),
        ))
    }

    pub fn digest(&self) -> &[u8; 32] {
        &self.digest
    }

    pub fn name_of(&self, id: K::Id) -> Option<&str> {
        self.by_id.get(&id).map(|name| &**name)
    }

    pub fn id_of(&self, name: &str) -> Option<K::Id> {
        self.by_name.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

impl<K: PaletteKind> fmt::Debug for Palette<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Palette<{}>({} entries, {})",
            K::NAME,
            self.len(),
            blake3::Hash::from(self.digest).to_hex()
        )
    }
}

/// Interns palettes by digest so that identical tables share one
/// instance. Entries are never evicted.
pub struct PaletteRegistry<K: PaletteKind> {
    palettes: Mutex<AHashMap<[u8; 32], Arc<Palette<K>>>>,
}

impl<K: PaletteKind> Default for PaletteRegistry<K> {
    fn default() -> Self {
        Self {
            palettes: Mutex::new(AHashMap::new()),
        }
    }
}

impl<K: PaletteKind> PaletteRegistry<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the shared instance with the same contents as `palette`.
    pub fn intern(&self, palette: Palette<K>) -> Arc<Palette<K>> {
        let mut palettes = self.palettes.lock().unwrap_or_else(PoisonError::into_inner);
        palettes
            .entry(palette.digest)
            .or_insert_with(|| {
                tracing::debug!("Registered new {} palette {palette:?}", K::NAME);
                Arc::new(palette)
            })
            .clone()
    }

    pub fn len(&self) -> usize {
        self.palettes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Translation between the client's palette and a backend's.
pub enum PaletteRewrite<K: PaletteKind> {
    /// Both sides use the same palette.
    Equal,
    Translate {
        upstream: Arc<Palette<K>>,
        downstream: Arc<Palette<K>>,
    },
}

pub type BlockRewrite = PaletteRewrite<Blocks>;
pub type ItemRewrite = PaletteRewrite<Items>;

impl<K: PaletteKind> PaletteRewrite<K> {
    pub fn between(upstream: &Arc<Palette<K>>, downstream: &Arc<Palette<K>>) -> Self {
        if Arc::ptr_eq(upstream, downstream) {
            PaletteRewrite::Equal
        } else {
            PaletteRewrite::Translate {
                upstream: upstream.clone(),
                downstream: downstream.clone(),
            }
        }
    }

    pub fn is_identity(&self) -> bool {
        matches!(self, PaletteRewrite::Equal)
    }

    /// Backend id to client id.
    pub fn from_downstream(&self, id: K::Id) -> K::Id {
        match self {
            PaletteRewrite::Equal => id,
            PaletteRewrite::Translate {
                upstream,
                downstream,
            } => translate(downstream, upstream, id),
        }
    }

    /// Client id to backend id.
    pub fn from_upstream(&self, id: K::Id) -> K::Id {
        match self {
            PaletteRewrite::Equal => id,
            PaletteRewrite::Translate {
                upstream,
                downstream,
            } => translate(upstream, downstream, id),
        }
    }
}

impl<K: PaletteKind> Clone for PaletteRewrite<K> {
    fn clone(&self) -> Self {
        match self {
            PaletteRewrite::Equal => PaletteRewrite::Equal,
            PaletteRewrite::Translate {
                upstream,
                downstream,
            } => PaletteRewrite::Translate {
                upstream: upstream.clone(),
                downstream: downstream.clone(),
            },
        }
    }
}

impl<K: PaletteKind> fmt::Debug for PaletteRewrite<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PaletteRewrite::Equal => f.write_str("Equal"),
            PaletteRewrite::Translate {
                upstream,
                downstream,
            } => f
                .debug_struct("Translate")
                .field("upstream", upstream)
                .field("downstream", downstream)
                .finish(),
        }
    }
}

fn translate<K: PaletteKind>(from: &Palette<K>, to: &Palette<K>, id: K::Id) -> K::Id {
    match from.name_of(id).and_then(|name| to.id_of(name)) {
        Some(translated) => translated,
        None => {
            let substitute = K::missing(to, id);
            tracing::debug!(
                "No {} mapping for {id} ({:?}), using {substitute}",
                K::NAME,
                from.name_of(id)
            );
            substitute
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn blocks(entries: &[(&str, u32)]) -> Arc<BlockPalette> {
        Arc::new(Palette::new(
            entries.iter().map(|(name, id)| (name.to_string(), *id)),
        ))
    }

    #[test]
    fn identical_contents_share_a_digest() {
        let a = BlockPalette::new([("minecraft:stone".to_owned(), 3), ("minecraft:air".to_owned(), 0)]);
        let b = BlockPalette::new([("minecraft:air".to_owned(), 0), ("minecraft:stone".to_owned(), 3)]);
        let c = BlockPalette::new([("minecraft:stone".to_owned(), 4)]);
        assert_eq!(a.digest(), b.digest());
        assert_ne!(a.digest(), c.digest());
    }

    #[test]
    fn registry_interns_by_contents() {
        let registry = PaletteRegistry::<Blocks>::new();
        let first = registry.intern(BlockPalette::new([("minecraft:stone".to_owned(), 3)]));
        let second = registry.intern(BlockPalette::new([("minecraft:stone".to_owned(), 3)]));
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.len(), 1);
        assert!(PaletteRewrite::between(&first, &second).is_identity());
    }

    #[test]
    fn translates_by_name() {
        let upstream = blocks(&[("minecraft:air", 0), ("minecraft:stone", 3)]);
        let downstream = blocks(&[("minecraft:air", 0), ("minecraft:stone", 7)]);
        let rewrite = PaletteRewrite::between(&upstream, &downstream);
        assert_eq!(rewrite.from_downstream(7), 3);
        assert_eq!(rewrite.from_upstream(3), 7);
        assert_eq!(rewrite.from_downstream(0), 0);
    }

    #[test]
    fn unknown_blocks_become_the_placeholder() {
        let upstream = blocks(&[("minecraft:stone", 3), (Blocks::UNKNOWN_BLOCK, 99)]);
        let downstream = blocks(&[("minecraft:stone", 7), ("minecraft:new_block", 8)]);
        let rewrite = PaletteRewrite::between(&upstream, &downstream);
        assert_eq!(rewrite.from_downstream(8), 99);
        // no placeholder on the backend side: left alone
        assert_eq!(rewrite.from_upstream(99), 99);
    }

    #[test]
    fn unknown_items_become_air() {
        let upstream = Arc::new(ItemPalette::new([("minecraft:apple".to_owned(), 257)]));
        let downstream = Arc::new(ItemPalette::new([
            ("minecraft:apple".to_owned(), 300),
            ("minecraft:new_item".to_owned(), 301),
        ]));
        let rewrite = PaletteRewrite::between(&upstream, &downstream);
        assert_eq!(rewrite.from_downstream(300), 257);
        assert_eq!(rewrite.from_downstream(301), Items::AIR);
        assert_eq!(rewrite.from_downstream(-5), Items::AIR);
    }

    #[test]
    fn loads_json() {
        let palette = ItemPalette::from_json(
            br#"[{"name": "minecraft:apple", "id": 257}, {"name": "minecraft:air", "id": 0}]"#,
        )
        .unwrap();
        assert_eq!(palette.len(), 2);
        assert_eq!(palette.id_of("minecraft:apple"), Some(257));
        assert_eq!(palette.name_of(0), Some("minecraft:air"));
    }

    proptest! {
        #[test]
        fn identity_rewrite_keeps_ids(id: u32) {
            let palette = blocks(&[("minecraft:stone", 1)]);
            let rewrite = PaletteRewrite::between(&palette, &palette);
            prop_assert_eq!(rewrite.from_downstream(id), id);
            prop_assert_eq!(rewrite.from_upstream(id), id);
        }

        #[test]
        fn disjoint_ranges_roundtrip(count in 1u32..200, offset in 1000u32..5000, x in 0u32..200) {
            let upstream = Arc::new(BlockPalette::new((0..count).map(|i| (format!("block_{i}"), i))));
            let downstream = Arc::new(BlockPalette::new((0..count).map(|i| (format!("block_{i}"), offset + count - 1 - i))));
            let rewrite = PaletteRewrite::between(&upstream, &downstream);
            prop_assume!(x < count);
            let backend_id = offset + x;
            prop_assert_eq!(rewrite.from_upstream(rewrite.from_downstream(backend_id)), backend_id);
        }
    }
}
