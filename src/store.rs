//! Tour persistence collaborator and the shared import inventory.
//!
//! The pipeline hands finished activities to a [`TourRepository`]. The
//! repository decides nothing about decoding; it only answers "was this
//! identity imported before" and accepts newly finished tours. The bundled
//! [`TourInventory`] is the in-memory implementation used for
//! de-duplication inside one process, and it doubles as the routing
//! structure for multi-part recordings: files sharing one filename stem are
//! serialized through a per-stem guard so a continuation part always sees
//! its predecessor fully registered.

use std::ffi::OsStr;
use std::path::Path;
use std::sync::{Arc, Mutex};

use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use tracing::trace;

use crate::types::{Activity, TourIdentity};

/// Recording file extensions recognized when reducing a file name to its
/// continuation stem. `.json.gz` names strip both layers.
const RECORDING_EXTENSIONS: &[&str] = &["gz", "json", "fit", "xml", "sml"];

/// Split a file name into its continuation stem and part number.
///
/// Devices that split one activity across files append `-<n>` to the shared
/// stem: `ride-1.json.gz`, `ride-2.json.gz`. The stem is the name with all
/// recording extensions and the part suffix removed; a name without a
/// numeric suffix has no part number.
///
/// ```
/// use std::path::Path;
/// use tracklog::store::part_key;
///
/// assert_eq!(part_key(Path::new("ride.fit")), ("ride".to_string(), None));
/// assert_eq!(part_key(Path::new("ride-2.json.gz")), ("ride".to_string(), Some(2)));
/// ```
pub fn part_key(path: &Path) -> (String, Option<u32>) {
    let mut name = match path.file_name().and_then(OsStr::to_str) {
        Some(name) => name.to_string(),
        None => return (String::new(), None),
    };

    loop {
        let layered = Path::new(&name);
        let Some(extension) = layered.extension().and_then(OsStr::to_str) else {
            break;
        };
        if !RECORDING_EXTENSIONS.contains(&extension.to_ascii_lowercase().as_str()) {
            break;
        }
        match layered.file_stem().and_then(OsStr::to_str) {
            Some(stem) => name = stem.to_string(),
            None => break,
        }
    }

    if let Some(dash) = name.rfind('-') {
        let digits = &name[dash + 1..];
        if !digits.is_empty()
            && digits.bytes().all(|b| b.is_ascii_digit())
            && let Ok(part) = digits.parse::<u32>()
        {
            return (name[..dash].to_string(), Some(part));
        }
    }
    (name, None)
}

/// Persistence collaborator consulted during finalization.
///
/// Implementations must tolerate concurrent calls; batch workers share one
/// repository across files.
pub trait TourRepository: Send + Sync {
    /// Whether an activity with this identity was imported before.
    fn is_already_imported(&self, identity: TourIdentity) -> bool;

    /// Accept a newly finished activity under its identity.
    fn register_new_tour(&self, identity: TourIdentity, activity: Activity);
}

/// In-memory tour repository and de-duplication structure.
///
/// Holds the identities known before this run (fed by the caller), the
/// activities finished during this run, and the per-stem state needed to
/// extend multi-part recordings in place.
#[derive(Debug, Default)]
pub struct TourInventory {
    /// Identities imported in earlier runs, seeded by the caller.
    previously_imported: DashSet<TourIdentity>,
    /// Activities finished during this run.
    fresh: DashMap<TourIdentity, Activity>,
    /// Identity of the newest activity registered per continuation stem.
    stem_heads: DashMap<String, TourIdentity>,
    /// One guard per stem so files of one physical activity import serially.
    stem_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl TourInventory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an identity as imported in an earlier run. Re-importing a file
    /// that resolves to it is skipped.
    pub fn mark_already_imported(&self, identity: TourIdentity) {
        self.previously_imported.insert(identity);
    }

    /// Register an activity unless its identity is already present.
    ///
    /// Returns whether the activity was inserted. The entry-based insert
    /// keeps two concurrent files with one identity from both landing.
    pub fn insert_if_absent(&self, identity: TourIdentity, activity: Activity) -> bool {
        if self.previously_imported.contains(&identity) {
            return false;
        }
        match self.fresh.entry(identity) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(activity);
                trace!("Registered tour {identity}");
                true
            }
        }
    }

    /// Guard serializing all imports that share one filename stem.
    pub fn stem_guard(&self, stem: &str) -> Arc<Mutex<()>> {
        self.stem_locks
            .entry(stem.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Identity of the newest activity imported under a stem, if any.
    pub fn stem_head(&self, stem: &str) -> Option<TourIdentity> {
        self.stem_heads.get(stem).map(|head| *head)
    }

    /// Remember which activity a later part of this stem would extend.
    pub fn record_stem_head(&self, stem: &str, identity: TourIdentity) {
        self.stem_heads.insert(stem.to_string(), identity);
    }

    /// Detach the stem's newest activity so a continuation can extend it.
    ///
    /// The activity leaves the fresh set; the caller re-registers the merged
    /// result under its new identity. Tours imported in earlier runs are not
    /// extendable, so a head pointing outside the fresh set yields `None`.
    pub fn take_for_extension(&self, stem: &str) -> Option<(TourIdentity, Activity)> {
        let head = self.stem_head(stem)?;
        self.fresh.remove(&head)
    }

    /// Clone of the activity registered under an identity, if present.
    pub fn get(&self, identity: TourIdentity) -> Option<Activity> {
        self.fresh.get(&identity).map(|entry| entry.value().clone())
    }

    /// Snapshot of the activities finished during this run, ordered by
    /// start time.
    pub fn newly_imported(&self) -> Vec<Activity> {
        let mut tours: Vec<Activity> =
            self.fresh.iter().map(|entry| entry.value().clone()).collect();
        tours.sort_by_key(|tour| tour.start_time);
        tours
    }

    /// Number of activities finished during this run.
    pub fn len(&self) -> usize {
        self.fresh.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fresh.is_empty()
    }
}

impl TourRepository for TourInventory {
    fn is_already_imported(&self, identity: TourIdentity) -> bool {
        self.previously_imported.contains(&identity) || self.fresh.contains_key(&identity)
    }

    fn register_new_tour(&self, identity: TourIdentity, activity: Activity) {
        self.insert_if_absent(identity, activity);
    }
}
