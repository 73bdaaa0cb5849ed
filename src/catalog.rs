//! The grouped item catalog from which the auction queue is built.
//!
//! A catalog is an ordered list of groups, each carrying an ordered list of
//! items. [`Catalog::build_queue`] flattens it into the working queue:
//! item order inside each group is shuffled uniformly, group order is kept,
//! and every item is tagged with its origin group so observers can render
//! the set it came from.

use std::path::{
    Path,
    PathBuf,
};

use rand::{
    seq::SliceRandom as _,
    Rng,
};
use serde::{
    Deserialize,
    Serialize,
};

/// Group id assigned to items inserted mid-auction via the add-item command.
pub const WILDCARD_GROUP_ID: &str = "WILDCARD";
pub const WILDCARD_GROUP_NAME: &str = "Wildcard Entry";

/// A demo dataset so the binary runs without any external catalog file.
const DEMO_CATALOG: &str = include_str!("../demos/catalog.json");

/// The role category of an auctionable player.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    Batter,
    Bowler,
    AllRounder,
    WicketKeeper,
}

/// A single auctionable item as it appears in the working queue and on the
/// wire. Immutable once created except for `base_price`, which the engine
/// may edit while the item is up for auction without a leader.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    pub id: String,
    pub name: String,
    pub role: Role,
    pub country: String,
    pub base_price: f64,
    pub group_id: String,
    pub group_name: String,
}

impl Item {
    /// Constructs an item for the wildcard group, to be pushed to the front
    /// of the queue.
    pub fn wildcard(name: String, role: Role, country: String, base_price: f64) -> Self {
        Self {
            id: format!("wildcard-{}", uuid::Uuid::new_v4()),
            name,
            role,
            country,
            base_price,
            group_id: WILDCARD_GROUP_ID.to_string(),
            group_name: WILDCARD_GROUP_NAME.to_string(),
        }
    }
}

/// An item as listed in the catalog file, before group tagging.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
struct CatalogItem {
    id: String,
    name: String,
    role: Role,
    country: String,
    base_price: f64,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
struct Group {
    id: String,
    name: String,
    items: Vec<CatalogItem>,
}

/// The static grouped dataset backing the auction. Held by the engine for
/// the lifetime of the process so that a reset can rebuild a fresh queue.
#[derive(Clone, Debug)]
pub struct Catalog {
    groups: Vec<Group>,
}

impl Catalog {
    /// Reads a catalog from the JSON file at `path`.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or is not valid catalog
    /// JSON. This is the only fatal startup error besides a bad config.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| Error::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&raw).map_err(|source| Error::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Parses a catalog from grouped JSON.
    ///
    /// # Errors
    /// Returns an error if `raw` is not valid catalog JSON.
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        let groups = serde_json::from_str(raw)?;
        Ok(Self {
            groups,
        })
    }

    /// Returns the built-in demo catalog.
    #[must_use]
    pub fn demo() -> Self {
        Self::from_json(DEMO_CATALOG).expect("the built-in demo catalog is valid by construction")
    }

    /// Flattens the catalog into a working queue: group order preserved,
    /// item order within each group uniformly permuted by `rng`.
    ///
    /// Pure given the rng, so a reset can rebuild the queue with a fresh
    /// permutation.
    pub fn build_queue<R: Rng>(&self, rng: &mut R) -> Vec<Item> {
        let mut queue = Vec::new();
        for group in &self.groups {
            let mut items = group.items.clone();
            items.shuffle(rng);
            queue.extend(items.into_iter().map(|item| Item {
                id: item.id,
                name: item.name,
                role: item.role,
                country: item.country,
                base_price: item.base_price,
                group_id: group.id.clone(),
                group_name: group.name.clone(),
            }));
        }
        queue
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed reading catalog file at `{path}`")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed parsing catalog file at `{path}` as JSON")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use rand::SeedableRng as _;
    use rand_chacha::ChaChaRng;

    use super::Catalog;

    fn two_group_catalog() -> Catalog {
        let groups = serde_json::from_str(
            r#"[
                {
                    "id": "G1",
                    "name": "Marquee",
                    "items": [
                        {"id": "a", "name": "A", "role": "batter", "country": "IN", "basePrice": 2.0},
                        {"id": "b", "name": "B", "role": "bowler", "country": "AU", "basePrice": 1.5},
                        {"id": "c", "name": "C", "role": "all-rounder", "country": "EN", "basePrice": 1.0}
                    ]
                },
                {
                    "id": "G2",
                    "name": "Capped",
                    "items": [
                        {"id": "d", "name": "D", "role": "wicket-keeper", "country": "NZ", "basePrice": 0.5}
                    ]
                }
            ]"#,
        )
        .unwrap();
        Catalog {
            groups,
        }
    }

    #[test]
    fn queue_preserves_group_order_and_item_set() {
        let catalog = two_group_catalog();
        let mut rng = ChaChaRng::seed_from_u64(42);
        for _ in 0..32 {
            let queue = catalog.build_queue(&mut rng);
            let ids: HashSet<_> = queue.iter().map(|item| item.id.as_str()).collect();
            assert_eq!(ids, HashSet::from(["a", "b", "c", "d"]));
            // group 1 items always come before the single group 2 item
            assert_eq!(queue[3].id, "d");
            assert!(queue[..3].iter().all(|item| item.group_id == "G1"));
        }
    }

    #[test]
    fn items_are_tagged_with_group_metadata() {
        let catalog = two_group_catalog();
        let queue = catalog.build_queue(&mut ChaChaRng::seed_from_u64(1));
        let last = queue.last().unwrap();
        assert_eq!(last.group_id, "G2");
        assert_eq!(last.group_name, "Capped");
    }

    #[test]
    fn shuffle_eventually_produces_a_different_permutation() {
        let catalog = two_group_catalog();
        let mut rng = ChaChaRng::seed_from_u64(7);
        let first: Vec<_> = catalog
            .build_queue(&mut rng)
            .into_iter()
            .map(|item| item.id)
            .collect();
        let mut saw_other_order = false;
        for _ in 0..64 {
            let other: Vec<_> = catalog
                .build_queue(&mut rng)
                .into_iter()
                .map(|item| item.id)
                .collect();
            if other != first {
                saw_other_order = true;
                break;
            }
        }
        assert!(saw_other_order, "32 shuffles of 3 items never changed order");
    }

    #[test]
    fn demo_catalog_parses() {
        let catalog = Catalog::demo();
        let queue = catalog.build_queue(&mut ChaChaRng::seed_from_u64(0));
        assert!(!queue.is_empty());
    }
}
